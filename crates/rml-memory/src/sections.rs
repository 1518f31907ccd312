use object::{
    endian::LittleEndian as LE,
    pe::{ImageDosHeader, ImageNtHeaders64, IMAGE_NT_SIGNATURE},
    read::pe::ImageNtHeaders,
};
use rml_core::{ModuleImage, Rva, RmlError, Va};

/// One PE section, reduced to what the scanners need: a name and an
/// image-base-relative span.
///
/// Invariant: `end > start`, and both offsets lie inside the mapped module
/// span. Sections violating either are dropped at parse time, so pointer
/// arithmetic against a stored section is always in bounds.
#[derive(Debug, Clone)]
pub struct Section {
    /// Section name (`.text`, `.rdata`, ...).
    pub name: String,

    /// Start of the section, relative to the image base.
    pub start: Rva,

    /// End of the section (exclusive), relative to the image base.
    pub end: Rva,
}

impl Section {
    /// Returns `true` if the offset falls inside the section.
    pub fn contains(&self, rva: Rva) -> bool {
        rva >= self.start && rva < self.end
    }

    /// The section size in bytes.
    pub fn len(&self) -> usize {
        (self.end.0 - self.start.0) as usize
    }

    /// Sections are never empty; kept for iterator ergonomics.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// The parsed section table of a process image.
///
/// Produced by a single parse pass; immutable afterwards. Re-parsing replaces
/// the whole set. Parsing is non-fatal by design — callers may inspect a
/// module speculatively — so all failures are returned, not thrown.
#[derive(Debug, Default)]
pub struct SectionTable {
    sections: Vec<Section>,
}

impl SectionTable {
    /// Parses the DOS/NT headers and section table of a module image.
    pub fn parse(image: &dyn ModuleImage) -> Result<Self, RmlError> {
        let data = image.data();

        let dos_header = ImageDosHeader::parse(data)
            .map_err(|_| RmlError::InvalidImage("invalid DOS header"))?;

        let mut offset = dos_header.nt_headers_offset().into();

        let (nt_headers, _data_directories) = ImageNtHeaders64::parse(data, &mut offset)
            .map_err(|_| RmlError::InvalidImage("invalid NT headers"))?;

        if nt_headers.signature.get(LE) != IMAGE_NT_SIGNATURE {
            return Err(RmlError::InvalidImage("invalid NT signature"));
        }

        let table = nt_headers
            .sections(data, offset)
            .map_err(|_| RmlError::InvalidImage("invalid section table"))?;

        let image_len = data.len() as u32;
        let mut sections = Vec::new();

        for header in table.iter() {
            let name = String::from_utf8_lossy(header.raw_name())
                .trim_end_matches('\0')
                .to_owned();

            let start = header.virtual_address.get(LE);
            let size = header.virtual_size.get(LE);
            let end = start.saturating_add(size).min(image_len);

            // Reject degenerate or out-of-span sections before anything
            // downstream trusts their offsets.
            if size == 0 || end <= start || start >= image_len {
                tracing::warn!(name, start, size, "dropping degenerate section");
                continue;
            }

            sections.push(Section {
                name,
                start: Rva(start),
                end: Rva(end),
            });
        }

        Ok(Self { sections })
    }

    /// Iterates over all sections in image order.
    pub fn iter(&self) -> impl Iterator<Item = &Section> {
        self.sections.iter()
    }

    /// Iterates over all sections with the given name.
    ///
    /// PE permits duplicate section names, and the RTTI scanner walks every
    /// `.rdata` section, so this is the primary lookup.
    pub fn named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Section> {
        self.sections.iter().filter(move |s| s.name == name)
    }

    /// The first section with the given name.
    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    /// Returns `true` if the offset falls inside any section with the given
    /// name.
    pub fn contains_rva(&self, name: &str, rva: Rva) -> bool {
        self.sections
            .iter()
            .any(|s| s.name == name && s.contains(rva))
    }

    /// Returns `true` if the virtual address falls inside any section with
    /// the given name.
    pub fn contains_va(&self, image: &dyn ModuleImage, name: &str, va: Va) -> bool {
        match image.va_to_rva(va) {
            Some(rva) => self.contains_rva(name, rva),
            None => false,
        }
    }

    /// The section containing the given offset, if any.
    pub fn section_containing(&self, rva: Rva) -> Option<&Section> {
        self.sections.iter().find(|s| s.contains(rva))
    }
}
