//! Built-in engine over raw image files.
//!
//! Knows nothing about operating system structures. It opens plain files
//! and provides two plugins:
//! - `imageinfo`: what the context knows about the target
//! - `hexdump`: a window of bytes, honoring the `offset` and `length`
//!   attributes

use super::{
    AnalysisEngine, EngineError, ImageHandle, ImageOpener, Plugin, PluginRegistry, ProgressSink,
};
use crate::coerce::{AnalysisObject, SourceValue};
use crate::models::{AttributeValue, ColumnHeader, DeviceDescriptor};
use crate::render::ResultBuilder;
use crate::session::AnalysisContext;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use tracing::debug;

const BYTES_PER_ROW: usize = 16;
const DEFAULT_DUMP_LENGTH: u64 = 64;
const MAX_DUMP_LENGTH: u64 = 4096;

/// A target image backed by a regular file.
#[derive(Debug)]
pub struct FileImage {
    file: Mutex<File>,
    size: u64,
}

impl FileImage {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            file: Mutex::new(file),
            size,
        })
    }
}

impl ImageHandle for FileImage {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        file.seek(SeekFrom::Start(offset))?;

        let mut filled = 0;
        while filled < buf.len() {
            match file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }
}

/// Opens device paths as local files.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileImageOpener;

impl ImageOpener for FileImageOpener {
    fn open(&self, device: &DeviceDescriptor) -> Result<Box<dyn ImageHandle>, EngineError> {
        let path = Path::new(&device.path);
        if path.is_dir() {
            return Err(EngineError::Other(format!(
                "{} is a directory, not an image",
                device.path
            )));
        }

        let image = FileImage::open(path)?;
        debug!("Opened {} ({} bytes)", device.path, image.size());
        Ok(Box::new(image))
    }
}

/// An offset into the raw image, sent as a typed object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageOffset(pub u64);

impl AnalysisObject for ImageOffset {
    fn type_name(&self) -> &str {
        "Pointer"
    }

    fn object_name(&self) -> &str {
        "offset"
    }

    fn offset(&self) -> u64 {
        self.0
    }

    fn address_space(&self) -> String {
        "FileAddressSpace".to_string()
    }

    fn to_integer(&self) -> Option<i128> {
        Some(i128::from(self.0))
    }

    fn render(&self) -> Option<String> {
        Some(format!("{:#010x}", self.0))
    }
}

impl SourceValue for ImageOffset {
    fn as_object(&self) -> Option<&dyn AnalysisObject> {
        Some(self)
    }
}

/// Reports what the analysis context knows about its target.
#[derive(Debug, Default)]
pub struct ImageInfo;

impl Plugin for ImageInfo {
    fn name(&self) -> &str {
        "imageinfo"
    }

    fn description(&self) -> &str {
        "Describe the target image and context state"
    }

    fn render(
        &self,
        context: &mut AnalysisContext,
        out: &mut ResultBuilder,
        _progress: &dyn ProgressSink,
    ) -> Result<(), EngineError> {
        out.set_table_header([
            ColumnHeader::new("Field", "field", "<20"),
            ColumnHeader::new("Value", "value", ""),
        ]);
        out.add_row(&[&"Target", &context.target()]);
        out.add_row(&[&"Size", &context.image().size()]);
        out.add_row(&[&"Profile", &context.profile()]);
        out.add_row(&[&"Base pointer", &context.base_pointer()]);

        for (name, value) in context.attributes() {
            let label = format!("attr:{}", name);
            out.add_row(&[&label, value]);
        }

        out.write_text(
            "{0} attribute(s) set",
            &[&context.attributes().len()],
        );
        Ok(())
    }
}

/// Dumps a window of the image as hex and ASCII.
#[derive(Debug, Default)]
pub struct HexDump;

impl HexDump {
    fn attribute_u64(context: &AnalysisContext, name: &str, default: u64) -> Result<u64, EngineError> {
        match context.attribute(name) {
            None => Ok(default),
            Some(value) => value
                .as_integer()
                .and_then(|n| u64::try_from(n).ok())
                .ok_or_else(|| EngineError::InvalidAttribute {
                    name: name.to_string(),
                    reason: format!("expected a non-negative integer, got {}", describe(value)),
                }),
        }
    }
}

fn describe(value: &AttributeValue) -> String {
    match value {
        AttributeValue::Text(text) => format!("{:?}", text),
        other => other.to_string(),
    }
}

impl Plugin for HexDump {
    fn name(&self) -> &str {
        "hexdump"
    }

    fn description(&self) -> &str {
        "Hex and ASCII dump of the image (attributes: offset, length)"
    }

    fn render(
        &self,
        context: &mut AnalysisContext,
        out: &mut ResultBuilder,
        progress: &dyn ProgressSink,
    ) -> Result<(), EngineError> {
        let offset = Self::attribute_u64(context, "offset", 0)?;
        let length = Self::attribute_u64(context, "length", DEFAULT_DUMP_LENGTH)?;
        if length == 0 || length > MAX_DUMP_LENGTH {
            return Err(EngineError::InvalidAttribute {
                name: "length".to_string(),
                reason: format!("must be between 1 and {}", MAX_DUMP_LENGTH),
            });
        }

        let image = context.image();
        if offset >= image.size() {
            return Err(EngineError::Other(format!(
                "offset {:#x} is past the end of the image ({} bytes)",
                offset,
                image.size()
            )));
        }

        let mut buf = vec![0u8; length as usize];
        let read = image.read_at(offset, &mut buf)?;
        buf.truncate(read);

        out.set_table_header([
            ColumnHeader::new("Offset", "offset", "[addrpad]"),
            ColumnHeader::new("Hex", "hex", "<48"),
            ColumnHeader::new("Data", "data", "<16"),
        ]);

        for (i, chunk) in buf.chunks(BYTES_PER_ROW).enumerate() {
            let row_offset = offset + (i * BYTES_PER_ROW) as u64;
            progress.report(&format!("Dumping {:#x}", row_offset));

            let hex = chunk
                .iter()
                .map(|b| format!("{:02x}", b))
                .collect::<Vec<_>>()
                .join(" ");
            let ascii: String = chunk
                .iter()
                .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
                .collect();

            out.add_row(&[&ImageOffset(row_offset), &hex, &ascii]);
        }

        Ok(())
    }
}

/// Engine with the built-in raw-image plugins.
#[derive(Debug)]
pub struct RawImageEngine {
    registry: PluginRegistry,
}

impl RawImageEngine {
    pub fn new() -> Self {
        let mut registry = PluginRegistry::new();
        registry.register(Box::new(ImageInfo));
        registry.register(Box::new(HexDump));
        Self { registry }
    }

    pub fn plugins(&self) -> impl Iterator<Item = &dyn Plugin> {
        self.registry.iter()
    }
}

impl Default for RawImageEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalysisEngine for RawImageEngine {
    fn plugin(&self, name: &str) -> Option<&dyn Plugin> {
        self.registry.get(name)
    }

    fn plugin_names(&self) -> Vec<&str> {
        self.registry.names()
    }
}
