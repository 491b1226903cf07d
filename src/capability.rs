bitflags::bitflags! {
    /// Port capability bits (spec §3).
    #[derive(Default)]
    pub struct Capability: u32 {
        /// Buffers on this port carry no payload memory; references are
        /// forwarded rather than copied.
        const PASSTHROUGH = 0x01;
        /// This port can act as the allocating side of a tunnelled pool.
        const ALLOCATION  = 0x02;
    }
}
