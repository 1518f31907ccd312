use rml_core::{ModuleImage, Rva, RmlError, Va};

use crate::Pattern;

/// A resolved pattern match inside a module image.
///
/// Handed to the batch callback exactly once per pattern. Besides the match
/// address itself, it can resolve the RIP-relative displacement most matched
/// instructions carry, turning "address of the instruction" into "address the
/// instruction references".
pub struct MatchHandle<'a> {
    image: &'a dyn ModuleImage,
    rva: Rva,
}

impl<'a> MatchHandle<'a> {
    /// The image-relative offset of the match.
    pub fn rva(&self) -> Rva {
        self.rva
    }

    /// The virtual address of the match.
    pub fn va(&self) -> Va {
        self.image.rva_to_va(self.rva)
    }

    /// The virtual address `offset` bytes past the match.
    pub fn add(&self, offset: u32) -> Va {
        self.image.rva_to_va(self.rva + offset)
    }

    /// Resolves a RIP-relative reference within the matched instruction.
    ///
    /// `disp_offset` is the byte offset of the 32-bit displacement from the
    /// start of the match; `insn_len` is the length of the instruction the
    /// displacement is relative to the end of.
    pub fn resolve_rip_rel(&self, disp_offset: u32, insn_len: u32) -> Result<Va, RmlError> {
        let disp = self.image.read_u32(self.rva + disp_offset)? as i32;
        let next = self.image.rva_to_va(self.rva + insn_len);

        Ok(Va(next.0.wrapping_add_signed(disp as i64)))
    }
}

type MatchCallback = Box<dyn Fn(&MatchHandle<'_>) + Send + Sync>;

struct Entry {
    name: &'static str,
    pattern: Pattern,
    callback: MatchCallback,
}

/// A named group of patterns resolved against one module in a single pass.
///
/// Resolution is all-or-nothing: if any pattern fails to match, [`run`]
/// returns an error and no further patterns are attempted, because the
/// pointer table a batch populates is only usable when complete. There is no
/// re-scan path; batches run once at attach time.
///
/// [`run`]: PatternBatch::run
pub struct PatternBatch {
    name: &'static str,
    entries: Vec<Entry>,
}

impl PatternBatch {
    /// Creates an empty batch.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: Vec::new(),
        }
    }

    /// The batch name, used in logs.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Adds a pattern with the callback invoked on its first match.
    pub fn add(
        &mut self,
        name: &'static str,
        pattern: &str,
        callback: impl Fn(&MatchHandle<'_>) + Send + Sync + 'static,
    ) -> Result<&mut Self, RmlError> {
        self.entries.push(Entry {
            name,
            pattern: Pattern::parse(pattern)?,
            callback: Box::new(callback),
        });

        Ok(self)
    }

    /// The number of patterns in the batch.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the batch holds no patterns.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolves every pattern against the image, invoking each callback
    /// exactly once with the first match.
    pub fn run(&self, image: &dyn ModuleImage) -> Result<(), RmlError> {
        let data = image.data();

        for entry in &self.entries {
            let offset = match entry.pattern.find(data) {
                Some(offset) => offset,
                None => {
                    tracing::error!(batch = self.name, pattern = entry.name, "pattern not found");
                    return Err(RmlError::PatternNotFound(entry.name.to_owned()));
                }
            };

            let handle = MatchHandle {
                image,
                rva: Rva(offset as u32),
            };

            tracing::debug!(
                batch = self.name,
                pattern = entry.name,
                va = %handle.va(),
                "pattern resolved"
            );

            (entry.callback)(&handle);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    };

    use rml_core::OwnedImage;

    use super::*;

    #[test]
    fn batch_resolves_all_and_invokes_once() {
        let mut image = OwnedImage::zeroed(Va(0x1000), 0x100);
        image.write_bytes(Rva(0x20), &[0x48, 0x8B, 0xC1]);
        image.write_bytes(Rva(0x40), &[0xDE, 0xAD]);

        let first = Arc::new(AtomicU64::new(0));
        let second = Arc::new(AtomicU64::new(0));

        let mut batch = PatternBatch::new("test");
        {
            let first = Arc::clone(&first);
            batch
                .add("mov", "48 8B ??", move |m| {
                    first.store(m.va().0, Ordering::SeqCst);
                })
                .unwrap();
        }
        {
            let second = Arc::clone(&second);
            batch
                .add("marker", "DE AD", move |m| {
                    second.fetch_add(m.va().0, Ordering::SeqCst);
                })
                .unwrap();
        }

        batch.run(&image).unwrap();

        assert_eq!(first.load(Ordering::SeqCst), 0x1020);
        assert_eq!(second.load(Ordering::SeqCst), 0x1040);
    }

    #[test]
    fn batch_fails_when_any_pattern_misses() {
        let image = OwnedImage::zeroed(Va(0x1000), 0x100);

        let mut batch = PatternBatch::new("test");
        batch.add("missing", "DE AD BE EF", |_| {}).unwrap();

        match batch.run(&image) {
            Err(RmlError::PatternNotFound(name)) => assert_eq!(name, "missing"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn rip_relative_resolution() {
        // lea rax, [rip + 0x10] encoded at 0x30: 48 8D 05 10 00 00 00
        let mut image = OwnedImage::zeroed(Va(0x1000), 0x100);
        image.write_bytes(Rva(0x30), &[0x48, 0x8D, 0x05, 0x10, 0x00, 0x00, 0x00]);

        let resolved = Arc::new(AtomicU64::new(0));
        let mut batch = PatternBatch::new("test");
        {
            let resolved = Arc::clone(&resolved);
            batch
                .add("lea", "48 8D 05 ?? ?? ?? ??", move |m| {
                    resolved.store(m.resolve_rip_rel(3, 7).unwrap().0, Ordering::SeqCst);
                })
                .unwrap();
        }

        batch.run(&image).unwrap();

        // match + 7 (next instruction) + 0x10 displacement
        assert_eq!(resolved.load(Ordering::SeqCst), 0x1000 + 0x30 + 7 + 0x10);
    }
}
