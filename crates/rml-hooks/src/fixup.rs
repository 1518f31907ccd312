use rml_core::{ModuleImage, Va};

/// Bounded read access to mapped code, used when resolving hook targets.
pub trait CodeReader: Send + Sync {
    /// Reads `buf.len()` bytes at `va`. Returns `false` if the span is not
    /// readable.
    fn read(&self, va: Va, buf: &mut [u8]) -> bool;
}

/// Reader over a module snapshot; the test and bootstrap path.
pub struct ImageCodeReader<'a> {
    image: &'a (dyn ModuleImage + Sync),
}

impl<'a> ImageCodeReader<'a> {
    /// Creates a reader over the given image.
    pub fn new(image: &'a (dyn ModuleImage + Sync)) -> Self {
        Self { image }
    }
}

impl CodeReader for ImageCodeReader<'_> {
    fn read(&self, va: Va, buf: &mut [u8]) -> bool {
        let Some(rva) = self.image.va_to_rva(va) else {
            return false;
        };

        match self.image.read_bytes(rva, buf.len()) {
            Ok(bytes) => {
                buf.copy_from_slice(bytes);
                true
            }
            Err(_) => false,
        }
    }
}

/// Reader over live process memory.
///
/// Used when a hook target lies outside the captured snapshot (import thunks
/// in other modules). Callers only point it at addresses already known to be
/// mapped code.
pub struct LiveCodeReader;

impl CodeReader for LiveCodeReader {
    fn read(&self, va: Va, buf: &mut [u8]) -> bool {
        if va.is_null() {
            return false;
        }

        unsafe {
            std::ptr::copy_nonoverlapping(va.as_usize() as *const u8, buf.as_mut_ptr(), buf.len());
        }

        true
    }
}

/// Longest jmp chain followed before giving up.
const MAX_CHAIN: usize = 8;

/// Resolves any leading `jmp` chain at a hook target so the detour lands on
/// the real prologue.
///
/// Hooking an already-hooked or thunked entry point otherwise patches the
/// thunk instead of the function. Follows `jmp rel8`, `jmp rel32` and
/// `jmp [rip+disp32]` up to a fixed depth; anything else terminates the walk.
pub fn fix_hook_address(reader: &dyn CodeReader, target: Va) -> Va {
    let mut current = target;

    for _ in 0..MAX_CHAIN {
        let mut code = [0u8; 6];
        if !reader.read(current, &mut code) {
            break;
        }

        let next = match code {
            // jmp rel8
            [0xEB, rel, ..] => {
                let disp = rel as i8 as i64;
                Va(current.0.wrapping_add(2).wrapping_add_signed(disp))
            }

            // jmp rel32
            [0xE9, a, b, c, d, _] => {
                let disp = i32::from_le_bytes([a, b, c, d]) as i64;
                Va(current.0.wrapping_add(5).wrapping_add_signed(disp))
            }

            // jmp [rip+disp32]
            [0xFF, 0x25, a, b, c, d] => {
                let disp = i32::from_le_bytes([a, b, c, d]) as i64;
                let slot = Va(current.0.wrapping_add(6).wrapping_add_signed(disp));

                let mut pointer = [0u8; 8];
                if !reader.read(slot, &mut pointer) {
                    break;
                }

                Va(u64::from_le_bytes(pointer))
            }

            _ => break,
        };

        if next.is_null() || next == current {
            break;
        }

        tracing::debug!(from = %current, to = %next, "following jmp thunk");
        current = next;
    }

    current
}

#[cfg(test)]
mod tests {
    use rml_core::{OwnedImage, Rva};

    use super::*;

    #[test]
    fn resolves_rel32_chain() {
        let mut image = OwnedImage::zeroed(Va(0x1000), 0x1000);
        // 0x1000: jmp +0x100 → 0x1105; 0x1105: jmp +0x20 → 0x112a
        image.write_bytes(Rva(0), &[0xE9, 0x00, 0x01, 0x00, 0x00]);
        image.write_bytes(Rva(0x105), &[0xE9, 0x20, 0x00, 0x00, 0x00]);

        let reader = ImageCodeReader::new(&image);
        assert_eq!(fix_hook_address(&reader, Va(0x1000)), Va(0x112A));
    }

    #[test]
    fn resolves_rip_indirect_jmp() {
        let mut image = OwnedImage::zeroed(Va(0x1000), 0x1000);
        // 0x1000: jmp [rip+0x10] → slot at 0x1016 holding 0x1800
        image.write_bytes(Rva(0), &[0xFF, 0x25, 0x10, 0x00, 0x00, 0x00]);
        image.write_u64(Rva(0x16), 0x1800);

        let reader = ImageCodeReader::new(&image);
        assert_eq!(fix_hook_address(&reader, Va(0x1000)), Va(0x1800));
    }

    #[test]
    fn plain_prologue_is_unchanged() {
        let mut image = OwnedImage::zeroed(Va(0x1000), 0x100);
        image.write_bytes(Rva(0), &[0x48, 0x89, 0x5C, 0x24, 0x08, 0x57]);

        let reader = ImageCodeReader::new(&image);
        assert_eq!(fix_hook_address(&reader, Va(0x1000)), Va(0x1000));
    }

    #[test]
    fn self_loop_terminates() {
        let mut image = OwnedImage::zeroed(Va(0x1000), 0x100);
        // jmp -5 → jumps to itself forever.
        image.write_bytes(Rva(0), &[0xE9, 0xFB, 0xFF, 0xFF, 0xFF]);

        let reader = ImageCodeReader::new(&image);
        assert_eq!(fix_hook_address(&reader, Va(0x1000)), Va(0x1000));
    }
}
