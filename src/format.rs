use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

/// Four-byte encoding identifier, e.g. `b"JPEG"` or `b"RGB3"`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FourCc(pub [u8; 4]);

impl FourCc {
    pub const UNKNOWN: FourCc = FourCc(*b"\0\0\0\0");

    pub const fn new(bytes: [u8; 4]) -> FourCc {
        FourCc(bytes)
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for b in &self.0 {
            let c = *b as char;
            if c.is_ascii_graphic() {
                write!(f, "{}", c)?;
            } else {
                write!(f, "\\x{:02x}", b)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "FourCc({})", self)
    }
}

/// Which of the elementary stream categories a format describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaType {
    Unknown,
    Control,
    Audio,
    Video,
    Subpicture,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Rational {
    pub num: i32,
    pub den: i32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VideoFormat {
    pub width: u32,
    pub height: u32,
    pub crop: Rect,
    pub frame_rate: Rational,
    pub par: Rational,
    pub color_space: FourCc,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AudioFormat {
    pub channels: u32,
    pub sample_rate: u32,
    pub bits_per_sample: u32,
    pub block_align: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SubpictureFormat {
    pub x_offset: u32,
    pub y_offset: u32,
}

/// Type-specific payload of an elementary stream format.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Specific {
    None,
    Video(VideoFormat),
    Audio(AudioFormat),
    Subpicture(SubpictureFormat),
}

impl Default for Specific {
    fn default() -> Self {
        Specific::None
    }
}

/// An elementary stream format descriptor.
///
/// This is the data a `Port` owns and a client mutates in place before
/// calling `format_commit`; see [`crate::port::Port::format_commit`].
#[derive(Clone, Debug, Default)]
pub struct Format {
    pub media_type: MediaType,
    pub encoding: FourCc,
    pub encoding_variant: FourCc,
    pub specific: Specific,
    pub bitrate: u32,
    pub flags: u32,
    pub extra_data: Vec<u8>,
}

impl Default for MediaType {
    fn default() -> Self {
        MediaType::Unknown
    }
}

/// A clonable, reference-counted handle to a [`Format`].
///
/// Two handles are "the same format" iff they point at the same allocation
/// (`Arc::ptr_eq`), which is exactly the pointer-identity check
/// `format_commit` performs against `format_ptr_copy` (see spec Invariant 1).
#[derive(Clone)]
pub struct FormatHandle(pub(crate) Arc<Mutex<Format>>);

impl FormatHandle {
    pub fn new(format: Format) -> FormatHandle {
        FormatHandle(Arc::new(Mutex::new(format)))
    }

    pub fn same_allocation(&self, other: &FormatHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn with<R>(&self, f: impl FnOnce(&Format) -> R) -> R {
        f(&self.0.lock())
    }

    pub fn with_mut<R>(&self, f: impl FnOnce(&mut Format) -> R) -> R {
        f(&mut self.0.lock())
    }

    pub fn get(&self) -> Format {
        self.0.lock().clone()
    }

    /// `mmal_format_full_copy`: replace the whole descriptor, including the
    /// type-specific payload, in place.
    pub fn full_copy_from(&self, other: &FormatHandle) {
        let src = other.get();
        *self.0.lock() = src;
    }

    /// `mmal_format_copy`: copy everything except the type-specific payload.
    pub fn copy_from(&self, other: &FormatHandle) {
        let src = other.get();
        let mut dst = self.0.lock();
        dst.media_type = src.media_type;
        dst.encoding = src.encoding;
        dst.encoding_variant = src.encoding_variant;
        dst.bitrate = src.bitrate;
        dst.flags = src.flags;
        dst.extra_data = src.extra_data;
    }
}

impl fmt::Debug for FormatHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("FormatHandle").field("format", &*self.0.lock()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fourcc_displays_ascii() {
        let fourcc = FourCc::new(*b"JPEG");
        assert_eq!(format!("{}", fourcc), "JPEG");
    }

    #[test]
    fn handles_to_distinct_allocations_are_not_the_same() {
        let a = FormatHandle::new(Format::default());
        let b = FormatHandle::new(Format::default());
        assert!(!a.same_allocation(&b));
        assert!(a.same_allocation(&a.clone()));
    }

    #[test]
    fn full_copy_overwrites_specific_payload() {
        let a = FormatHandle::new(Format {
            encoding: FourCc::new(*b"JPEG"),
            specific: Specific::Video(VideoFormat {
                width: 1920,
                ..Default::default()
            }),
            ..Default::default()
        });
        let b = FormatHandle::new(Format::default());

        b.full_copy_from(&a);
        b.with(|f| {
            assert_eq!(f.encoding, FourCc::new(*b"JPEG"));
            match f.specific {
                Specific::Video(v) => assert_eq!(v.width, 1920),
                _ => panic!("expected video format"),
            }
        });
    }
}
