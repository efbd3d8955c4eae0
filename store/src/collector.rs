//! Write-side entry point for inbound profiles

use crate::context::Context;
use crate::error::Result;
use crate::storage::{ProfileBody, WriteProfileParams, Writer};
use aperture_shared::Meta;
use std::sync::Arc;
use tracing::debug;

/// Validates inbound parameters and hands the body to the writer.
pub struct Collector {
    writer: Arc<dyn Writer>,
}

impl Collector {
    pub fn new(writer: Arc<dyn Writer>) -> Self {
        Self { writer }
    }

    pub async fn write_profile(
        &self,
        ctx: &Context,
        params: &WriteProfileParams,
        body: ProfileBody,
    ) -> Result<Meta> {
        params.validate()?;
        let meta = self.writer.write_profile(ctx, params, body).await?;
        debug!(
            "collected {} profile {} for {}",
            meta.profile_type, meta.profile_id, meta.service
        );
        Ok(meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::storage::testing::StubWriter;
    use aperture_shared::{Labels, ProfileType};

    #[tokio::test]
    async fn test_rejects_before_writing() {
        let stub = Arc::new(StubWriter::new());
        let collector = Collector::new(stub.clone());
        let ctx = Context::background();

        let mut params = WriteProfileParams {
            profile_type: ProfileType::Cpu,
            ..Default::default()
        };
        let err = collector
            .write_profile(&ctx, &params, ProfileBody::from(b"x".to_vec()))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Validation(_)));

        params.service = "api".into();
        params.profile_type = ProfileType::Unknown;
        let err = collector
            .write_profile(&ctx, &params, ProfileBody::from(b"x".to_vec()))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Validation(_)));
        assert!(stub.calls().is_empty());
    }

    #[tokio::test]
    async fn test_returns_writer_meta() {
        let stub = Arc::new(StubWriter::new());
        let collector = Collector::new(stub.clone());

        let params = WriteProfileParams {
            service: "api".into(),
            profile_type: ProfileType::Heap,
            labels: Labels::from_pairs([("az", "1")]),
            ..Default::default()
        };
        let meta = collector
            .write_profile(&Context::background(), &params, ProfileBody::from(b"x".to_vec()))
            .await
            .unwrap();

        let calls = stub.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].meta, meta);
        assert_eq!(meta.labels, params.labels);
    }
}
