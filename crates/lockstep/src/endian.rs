//! Byte-order conversion for typed stream I/O.
//!
//! Each direction of a [`ReplicatedChannel`](crate::ReplicatedChannel) has
//! its own swap flag. Fixed modes decide the flag from configuration alone;
//! [`EndianMode::Automatic`](lockstep_types::EndianMode::Automatic) decides
//! it from a magic value the peer echoes back during setup.

use lockstep_config::ChannelConfig;

use crate::error::{ReplicationError, Result};

/// Widest scalar supported by typed reads and writes.
pub const MAX_SCALAR_WIDTH: usize = 8;

mod sealed {
    pub trait Sealed {}
}

/// A fixed-width value that can be read from or written to a stream.
pub trait Scalar: Copy + sealed::Sealed {
    /// Encoded width in bytes.
    const WIDTH: usize;

    /// Writes the value into `out` (exactly [`Self::WIDTH`] bytes), reversing
    /// the byte order if `swap` is set.
    fn encode(self, swap: bool, out: &mut [u8]);

    /// Reads a value from exactly [`Self::WIDTH`] bytes.
    fn decode(bytes: &[u8], swap: bool) -> Self;
}

macro_rules! impl_scalar {
    ($($ty:ty),* $(,)?) => {
        $(
            impl sealed::Sealed for $ty {}

            impl Scalar for $ty {
                const WIDTH: usize = std::mem::size_of::<$ty>();

                fn encode(self, swap: bool, out: &mut [u8]) {
                    let mut raw = self.to_ne_bytes();
                    if swap {
                        raw.reverse();
                    }
                    out.copy_from_slice(&raw);
                }

                fn decode(bytes: &[u8], swap: bool) -> Self {
                    let mut raw: [u8; std::mem::size_of::<$ty>()] = bytes
                        .try_into()
                        .expect("caller passes exactly WIDTH bytes");
                    if swap {
                        raw.reverse();
                    }
                    <$ty>::from_ne_bytes(raw)
                }
            }
        )*
    };
}

impl_scalar!(u8, u16, u32, u64, i8, i16, i32, i64, f32, f64);

/// Negotiated swap decisions for both directions of a channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SwapFlags {
    /// Swap values read from the peer.
    pub read: bool,
    /// Swap values written to the peer.
    pub write: bool,
}

impl SwapFlags {
    /// True if either direction is automatic and a handshake is required.
    pub fn needs_handshake(config: &ChannelConfig) -> bool {
        config.read_order.is_automatic() || config.write_order.is_automatic()
    }

    /// Resolves both flags.
    ///
    /// `peer_swapped` is the handshake result and must be present whenever
    /// [`needs_handshake`](Self::needs_handshake) is true. An automatic read
    /// side swaps if the peer's order differs from ours; an automatic write
    /// side always writes native order and leaves conversion to the peer.
    pub fn resolve(config: &ChannelConfig, peer_swapped: Option<bool>) -> Self {
        let automatic = peer_swapped.unwrap_or(false);
        Self {
            read: config.read_order.fixed_swap().unwrap_or(automatic),
            write: config.write_order.fixed_swap().unwrap_or(false),
        }
    }
}

/// Compares the bytes the peer echoed with our magic value.
///
/// Every node calls this on the same replicated bytes and reads them in its
/// own native order, so nodes with different byte orders still reach the
/// right decision for themselves.
///
/// # Errors
///
/// [`ReplicationError::Setup`] if `magic` reads the same in both byte
/// orders, or if the peer sent neither `magic` nor its byte swap.
pub fn derive_swap(magic: u32, echoed: [u8; 4]) -> Result<bool> {
    check_magic(magic)?;
    let seen = u32::from_ne_bytes(echoed);
    if seen == magic {
        Ok(false)
    } else if seen == magic.swap_bytes() {
        Ok(true)
    } else {
        Err(ReplicationError::setup(format!(
            "byte-order handshake expected {magic:#010x}, peer sent {seen:#010x}"
        )))
    }
}

/// Rejects a magic value that cannot tell the two byte orders apart.
pub(crate) fn check_magic(magic: u32) -> Result<()> {
    if magic == magic.swap_bytes() {
        return Err(ReplicationError::setup(format!(
            "handshake magic {magic:#010x} reads the same in both byte orders"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockstep_types::EndianMode;
    use proptest::prelude::*;
    use test_case::test_case;

    fn round_trip<T: Scalar + PartialEq + std::fmt::Debug>(value: T, swap: bool) {
        let mut buf = [0u8; MAX_SCALAR_WIDTH];
        value.encode(swap, &mut buf[..T::WIDTH]);
        assert_eq!(T::decode(&buf[..T::WIDTH], swap), value);
    }

    #[test]
    fn swapped_encoding_reverses_bytes() {
        let mut out = [0u8; 4];
        0x0102_0304u32.encode(true, &mut out);
        let mut expected = 0x0102_0304u32.to_ne_bytes();
        expected.reverse();
        assert_eq!(out, expected);
    }

    #[test_case(0x1234_5678, 0x1234_5678u32.to_ne_bytes(), Some(false) ; "same order")]
    #[test_case(0x1234_5678, 0x7856_3412u32.to_ne_bytes(), Some(true) ; "opposite order")]
    #[test_case(0x1234_5678, [0, 0, 0, 0], None ; "garbage")]
    #[test_case(0xABCD_CDAB, 0xABCD_CDABu32.to_ne_bytes(), None ; "symmetric magic")]
    fn handshake_decision(magic: u32, echoed: [u8; 4], expected: Option<bool>) {
        match expected {
            Some(swap) => assert_eq!(derive_swap(magic, echoed).unwrap(), swap),
            None => assert!(matches!(
                derive_swap(magic, echoed),
                Err(ReplicationError::Setup { .. })
            )),
        }
    }

    #[test_case(EndianMode::Native, false ; "native")]
    #[test_case(EndianMode::Automatic, false ; "automatic")]
    fn write_side_never_swaps_without_fixed_foreign_order(mode: EndianMode, expected: bool) {
        let config = ChannelConfig {
            write_order: mode,
            ..ChannelConfig::default()
        };
        assert_eq!(SwapFlags::resolve(&config, Some(true)).write, expected);
    }

    #[test]
    fn automatic_read_follows_handshake() {
        let config = ChannelConfig::default();
        assert!(SwapFlags::needs_handshake(&config));
        assert!(SwapFlags::resolve(&config, Some(true)).read);
        assert!(!SwapFlags::resolve(&config, Some(false)).read);
    }

    #[test]
    fn fixed_orders_skip_handshake() {
        let config = ChannelConfig {
            read_order: EndianMode::Big,
            write_order: EndianMode::Little,
            ..ChannelConfig::default()
        };
        assert!(!SwapFlags::needs_handshake(&config));
        let flags = SwapFlags::resolve(&config, None);
        assert_eq!(flags.read, cfg!(target_endian = "little"));
        assert_eq!(flags.write, cfg!(target_endian = "big"));
    }

    proptest! {
        #[test]
        fn prop_integers_round_trip(a: u16, b: i32, c: u64, d: i8, swap: bool) {
            round_trip(a, swap);
            round_trip(b, swap);
            round_trip(c, swap);
            round_trip(d, swap);
        }

        #[test]
        fn prop_floats_round_trip_bitwise(bits32: u32, bits64: u64, swap: bool) {
            let mut buf = [0u8; MAX_SCALAR_WIDTH];
            f32::from_bits(bits32).encode(swap, &mut buf[..4]);
            prop_assert_eq!(f32::decode(&buf[..4], swap).to_bits(), bits32);
            f64::from_bits(bits64).encode(swap, &mut buf[..8]);
            prop_assert_eq!(f64::decode(&buf[..8], swap).to_bits(), bits64);
        }
    }
}
