use crate::{Rva, RmlError, Va};

/// A module mapped into the current process, seen as a base address plus a
/// byte snapshot.
///
/// All discovery code (pattern scanning, PE parsing, RTTI scanning) works
/// against this trait rather than raw pointers. Every read is bounds-checked
/// against the snapshot, which is what makes an unconstrained scan over
/// untrusted candidate addresses safe: a bad candidate is rejected by a range
/// check, never dereferenced.
pub trait ModuleImage {
    /// The base virtual address the module is mapped at.
    fn base(&self) -> Va;

    /// The raw bytes of the mapped module.
    fn data(&self) -> &[u8];

    /// The size of the mapped module in bytes.
    fn len(&self) -> usize {
        self.data().len()
    }

    /// Returns `true` if the snapshot is empty.
    fn is_empty(&self) -> bool {
        self.data().is_empty()
    }

    /// Returns `true` if the virtual address falls inside the module span.
    fn contains_va(&self, va: Va) -> bool {
        va >= self.base() && va.0 < self.base().0 + self.len() as u64
    }

    /// Converts a virtual address to an image-base-relative offset.
    fn va_to_rva(&self, va: Va) -> Option<Rva> {
        if !self.contains_va(va) {
            return None;
        }

        Some(Rva((va - self.base()).0 as u32))
    }

    /// Converts an image-base-relative offset to a virtual address.
    fn rva_to_va(&self, rva: Rva) -> Va {
        self.base() + rva.0 as u64
    }

    /// Reads `len` bytes at the given offset, if they fit in the image.
    fn read_bytes(&self, rva: Rva, len: usize) -> Result<&[u8], RmlError> {
        self.data()
            .get(rva.as_usize()..)
            .and_then(|tail| tail.get(..len))
            .ok_or(RmlError::OutOfBounds(rva))
    }

    /// Reads a little-endian `u32` at the given offset.
    fn read_u32(&self, rva: Rva) -> Result<u32, RmlError> {
        let bytes = self.read_bytes(rva, 4)?;
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
    }

    /// Reads a little-endian `u64` at the given offset.
    fn read_u64(&self, rva: Rva) -> Result<u64, RmlError> {
        let bytes = self.read_bytes(rva, 8)?;
        Ok(u64::from_le_bytes(bytes.try_into().unwrap()))
    }
}

/// A module image backed by an owned byte buffer.
///
/// This is the snapshot type produced by the live capture path, and the type
/// tests use to build synthetic images.
pub struct OwnedImage {
    base: Va,
    data: Vec<u8>,
}

impl OwnedImage {
    /// Creates an image from a base address and a byte buffer.
    pub fn new(base: Va, data: Vec<u8>) -> Self {
        Self { base, data }
    }

    /// Creates a zero-filled image of the given size.
    pub fn zeroed(base: Va, size: usize) -> Self {
        Self {
            base,
            data: vec![0; size],
        }
    }

    /// Writes raw bytes at the given offset, growing nothing: the write must
    /// fit inside the image.
    pub fn write_bytes(&mut self, rva: Rva, bytes: &[u8]) {
        let start = rva.as_usize();
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
    }

    /// Writes a little-endian `u32` at the given offset.
    pub fn write_u32(&mut self, rva: Rva, value: u32) {
        self.write_bytes(rva, &value.to_le_bytes());
    }

    /// Writes a little-endian `u64` at the given offset.
    pub fn write_u64(&mut self, rva: Rva, value: u64) {
        self.write_bytes(rva, &value.to_le_bytes());
    }
}

impl ModuleImage for OwnedImage {
    fn base(&self) -> Va {
        self.base
    }

    fn data(&self) -> &[u8] {
        &self.data
    }
}

#[cfg(windows)]
pub(crate) mod live {
    use windows::{
        core::PCWSTR,
        Win32::{
            Foundation::HMODULE,
            System::{
                LibraryLoader::GetModuleHandleW,
                ProcessStatus::{GetModuleInformation, MODULEINFO},
                Threading::GetCurrentProcess,
            },
        },
    };

    use super::{ModuleImage, OwnedImage};
    use crate::{RmlError, Va};

    /// A snapshot of a module currently loaded in this process.
    pub struct LiveModule {
        image: OwnedImage,
    }

    impl LiveModule {
        /// Captures a snapshot of a loaded module by name, or of the main
        /// executable when `name` is `None`.
        pub fn capture(name: Option<&str>) -> Result<Self, RmlError> {
            let wide = name.map(|name| {
                name.encode_utf16()
                    .chain(std::iter::once(0))
                    .collect::<Vec<u16>>()
            });

            let handle = unsafe {
                GetModuleHandleW(match &wide {
                    Some(wide) => PCWSTR(wide.as_ptr()),
                    None => PCWSTR::null(),
                })
            }
            .map_err(|_| RmlError::Other("module not found"))?;

            Self::capture_handle(handle)
        }

        fn capture_handle(handle: HMODULE) -> Result<Self, RmlError> {
            let mut info = MODULEINFO::default();

            unsafe {
                GetModuleInformation(
                    GetCurrentProcess(),
                    handle,
                    &mut info,
                    std::mem::size_of::<MODULEINFO>() as u32,
                )
            }
            .map_err(|_| RmlError::Other("module information unavailable"))?;

            let base = Va(info.lpBaseOfDll as u64);
            let size = info.SizeOfImage as usize;

            // The module is mapped and readable for its whole SizeOfImage
            // span while it stays loaded; we snapshot it in one copy so all
            // later reads are bounds-checked slices.
            let data = unsafe {
                std::slice::from_raw_parts(info.lpBaseOfDll as *const u8, size).to_vec()
            };

            tracing::debug!(%base, size, "captured module snapshot");

            Ok(Self {
                image: OwnedImage::new(base, data),
            })
        }
    }

    impl ModuleImage for LiveModule {
        fn base(&self) -> Va {
            self.image.base()
        }

        fn data(&self) -> &[u8] {
            self.image.data()
        }
    }
}
