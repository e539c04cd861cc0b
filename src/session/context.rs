//! Per-target analysis context.

use crate::engine::ImageHandle;
use crate::models::AttributeValue;
use std::collections::BTreeMap;

/// Reusable state for running plugins against one target.
///
/// Built once per target by the runner, owned by the
/// [`ContextCache`](super::ContextCache), mutated by plugin runs and by
/// controller-supplied attributes.
#[derive(Debug)]
pub struct AnalysisContext {
    target: String,
    image: Box<dyn ImageHandle>,
    profile: String,
    base_pointer: Option<u64>,
    attributes: BTreeMap<String, AttributeValue>,
}

impl AnalysisContext {
    pub fn new(target: impl Into<String>, image: Box<dyn ImageHandle>, profile: impl Into<String>) -> Self {
        let base_pointer = image.base_pointer();
        Self {
            target: target.into(),
            image,
            profile: profile.into(),
            base_pointer,
            attributes: BTreeMap::new(),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn image(&self) -> &dyn ImageHandle {
        self.image.as_ref()
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    /// Page-table base pointer, when the acquisition layer exposed one.
    pub fn base_pointer(&self) -> Option<u64> {
        self.base_pointer
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }

    pub fn attributes(&self) -> &BTreeMap<String, AttributeValue> {
        &self.attributes
    }

    /// Set one attribute; it persists for later runs on this context.
    pub fn set_attribute(&mut self, name: impl Into<String>, value: AttributeValue) {
        self.attributes.insert(name.into(), value);
    }

    pub fn set_attributes<I>(&mut self, attributes: I)
    where
        I: IntoIterator<Item = (String, AttributeValue)>,
    {
        self.attributes.extend(attributes);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io;

    /// In-memory image used by session and runner tests.
    #[derive(Debug, Default)]
    pub(crate) struct MemoryImage {
        pub data: Vec<u8>,
        pub base_pointer: Option<u64>,
    }

    impl ImageHandle for MemoryImage {
        fn size(&self) -> u64 {
            self.data.len() as u64
        }

        fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
            let start = (offset as usize).min(self.data.len());
            let end = (start + buf.len()).min(self.data.len());
            buf[..end - start].copy_from_slice(&self.data[start..end]);
            Ok(end - start)
        }

        fn base_pointer(&self) -> Option<u64> {
            self.base_pointer
        }
    }

    pub(crate) fn context(target: &str) -> AnalysisContext {
        AnalysisContext::new(target, Box::new(MemoryImage::default()), "Win7SP1x64")
    }

    #[test]
    fn test_base_pointer_from_image() {
        let image = MemoryImage {
            data: vec![0; 16],
            base_pointer: Some(0x187000),
        };
        let context = AnalysisContext::new("/dev/pmem", Box::new(image), "WinXPSP2x86");

        assert_eq!(context.target(), "/dev/pmem");
        assert_eq!(context.profile(), "WinXPSP2x86");
        assert_eq!(context.base_pointer(), Some(0x187000));
        assert_eq!(context.image().size(), 16);
    }

    #[test]
    fn test_attributes_persist_and_override() {
        let mut context = context("img1");
        context.set_attribute("pid", AttributeValue::Integer(4));
        context.set_attributes([
            ("pid".to_string(), AttributeValue::Integer(8)),
            ("dump_dir".to_string(), AttributeValue::Text("/tmp".to_string())),
        ]);

        assert_eq!(context.attribute("pid"), Some(&AttributeValue::Integer(8)));
        assert_eq!(context.attributes().len(), 2);
        assert!(context.attribute("missing").is_none());
    }
}
