use bitfield::bitfield;

bitfield! {
    /// TIMINGR value
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct Timing(u32);
    impl Debug;
    u8;
    /// Kernel clock prescaler minus one
    pub presc, set_presc: 31, 28;
    /// Data setup time in prescaled clocks minus one
    pub scldel, set_scldel: 23, 20;
    /// Data hold time in prescaled clocks
    pub sdadel, set_sdadel: 19, 16;
    /// SCL high period in prescaled clocks minus one
    pub sclh, set_sclh: 15, 8;
    /// SCL low period in prescaled clocks minus one
    pub scll, set_scll: 7, 0;
}

bitfield! {
    /// ISR flags used by the master transfer loop
    #[derive(Clone, Copy, Default, PartialEq, Eq)]
    pub struct Status(u32);
    impl Debug;
    /// Transmit data register empty and more bytes expected
    pub txis, set_txis: 1;
    /// Receive data register not empty
    pub rxne, set_rxne: 2;
    /// NACK received
    pub nackf, set_nackf: 4;
    /// STOP detected
    pub stopf, set_stopf: 5;
    /// NBYTES transferred without AUTOEND
    pub tc, set_tc: 6;
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_timing() {
        let mut timing = Timing(0);
        timing.set_presc(3);
        timing.set_scldel(4);
        timing.set_sdadel(2);
        timing.set_sclh(0xf);
        timing.set_scll(0x13);

        assert_eq!(timing.0, 0x3042_0f13);
        assert_eq!(timing.presc(), 3);
        assert_eq!(timing.sclh(), 0xf);
    }

    #[test]
    fn test_status() {
        let status = Status(0x0000_8032);

        assert!(status.txis());
        assert!(!status.rxne());
        assert!(status.nackf());
        assert!(status.stopf());
        assert!(!status.tc());
    }
}
