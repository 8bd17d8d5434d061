//! Engine facade binding a codec to a session registry.

use std::path::Path;
use std::sync::Arc;

use rqblock_codec::{Codec, RaptorQCodec};
use rqblock_core::{Result, Session, SessionConfig, SessionRegistry};

use crate::decode::{DecodeReport, FileDecoder};
use crate::encode::{FileEncoder, ProcessResult};

/// Entry point for session-scoped file encoding and decoding
///
/// Cloning an engine yields another handle to the same registry and codec.
#[derive(Debug, Clone)]
pub struct Engine {
    registry: SessionRegistry,
    encoder: FileEncoder,
    decoder: FileDecoder,
}

impl Engine {
    /// Engine using RaptorQ and a fresh registry
    #[must_use]
    pub fn new() -> Self {
        Self::with_codec(Arc::new(RaptorQCodec::new()))
    }

    /// Engine using `codec` and a fresh registry
    #[must_use]
    pub fn with_codec(codec: Arc<dyn Codec>) -> Self {
        Self::with_registry(SessionRegistry::new(), codec)
    }

    /// Engine using `codec` and an existing registry
    #[must_use]
    pub fn with_registry(registry: SessionRegistry, codec: Arc<dyn Codec>) -> Self {
        Self {
            registry,
            encoder: FileEncoder::new(Arc::clone(&codec)),
            decoder: FileDecoder::new(codec),
        }
    }

    /// Registry the engine opens sessions in
    #[must_use]
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Open a session
    ///
    /// # Errors
    ///
    /// See [`SessionRegistry::open`].
    pub fn open_session(&self, config: SessionConfig) -> Result<Session> {
        self.registry.open(config)
    }

    /// Recommended block size, or 0 if the session is closed
    #[must_use]
    pub fn recommended_block_size(&self, session: &Session, file_size: u64) -> u64 {
        session.recommended_block_size(file_size)
    }

    /// Encode a file into symbols and a layout
    ///
    /// # Errors
    ///
    /// See [`FileEncoder::encode_file`].
    pub fn encode_file<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        session: &Session,
        input: P,
        output_dir: Q,
        block_size: u64,
    ) -> Result<ProcessResult> {
        self.encoder
            .encode_file(session, input, output_dir, block_size)
    }

    /// Compute a layout without writing symbols
    ///
    /// # Errors
    ///
    /// See [`FileEncoder::create_metadata`].
    pub fn create_metadata<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        session: &Session,
        input: P,
        layout_path: Q,
        block_size: u64,
    ) -> Result<ProcessResult> {
        self.encoder
            .create_metadata(session, input, layout_path, block_size)
    }

    /// Reconstruct a file from symbols and its layout
    ///
    /// # Errors
    ///
    /// See [`FileDecoder::decode`].
    pub fn decode<P: AsRef<Path>, Q: AsRef<Path>, R: AsRef<Path>>(
        &self,
        session: &Session,
        symbols_dir: P,
        output_path: Q,
        layout_path: R,
    ) -> Result<DecodeReport> {
        self.decoder
            .decode(session, symbols_dir, output_path, layout_path)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::layout_path_in;
    use crate::test_support::{sample_data, test_config, write_input};
    use rqblock_core::ErrorKind;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_engine_roundtrip() {
        let engine = Engine::new();
        let session = engine.open_session(test_config()).unwrap();
        assert_eq!(engine.registry().active_count(), 1);

        let dir = tempdir().unwrap();
        let data = sample_data(25_000);
        let input = write_input(dir.path(), "input.bin", &data);
        let symbols = dir.path().join("symbols");
        let output = dir.path().join("output.bin");

        let block_size = engine.recommended_block_size(&session, data.len() as u64);
        assert_eq!(block_size, data.len() as u64);

        let result = engine
            .encode_file(&session, &input, &symbols, block_size)
            .unwrap();
        assert_eq!(result.blocks.len(), 1);

        engine
            .decode(&session, &symbols, &output, layout_path_in(&symbols))
            .unwrap();
        assert_eq!(fs::read(&output).unwrap(), data);

        assert!(session.close());
        assert_eq!(engine.registry().active_count(), 0);
        assert_eq!(engine.recommended_block_size(&session, 1000), 0);
    }

    #[test]
    fn test_shared_registry() {
        let registry = SessionRegistry::new();
        let a = Engine::with_registry(registry.clone(), Arc::new(RaptorQCodec::new()));
        let b = a.clone();

        let s1 = a.open_session(test_config()).unwrap();
        let s2 = b.open_session(test_config()).unwrap();
        assert_ne!(s1.id(), s2.id());
        assert_eq!(registry.active_count(), 2);
    }

    #[test]
    fn test_metadata_via_engine() {
        let engine = Engine::default();
        let session = engine.open_session(test_config()).unwrap();
        let dir = tempdir().unwrap();
        let input = write_input(dir.path(), "input.bin", &sample_data(4000));

        let result = engine
            .create_metadata(&session, &input, dir.path().join("layout.json"), 0)
            .unwrap();
        assert_eq!(result.blocks.len(), 1);

        session.close();
        let err = engine
            .create_metadata(&session, &input, dir.path().join("again.json"), 0)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SessionClosed);
        assert!(!dir.path().join("again.json").exists());
    }
}
