use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::config::LedgerConfig;
use crate::content::{ContentStore, SledContentStore};
use crate::signer::Signer;
use crate::store::DocumentStore;

/// Wires a [`DocumentStore`] to its collaborators. Anything left unset
/// falls back to the configuration (signer) or the bundled default
/// (sled content tree, system clock).
pub struct DocumentStoreBuilder {
    db: Arc<sled::Db>,
    config: LedgerConfig,
    signer: Option<Arc<dyn Signer>>,
    content: Option<Arc<dyn ContentStore>>,
    clock: Option<Arc<dyn Clock>>,
}

impl DocumentStoreBuilder {
    pub fn new(db: Arc<sled::Db>) -> Self {
        Self {
            db,
            config: LedgerConfig::default(),
            signer: None,
            content: None,
            clock: None,
        }
    }
    pub fn set_config(mut self, config: LedgerConfig) -> Self {
        self.config = config;
        self
    }
    pub fn set_signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer = Some(signer);
        self
    }
    pub fn set_content_store(mut self, content: Arc<dyn ContentStore>) -> Self {
        self.content = Some(content);
        self
    }
    pub fn set_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> anyhow::Result<DocumentStore> {
        self.config.validate()?;

        let signer = match self.signer {
            Some(signer) => signer,
            None => self.config.signer()?,
        };
        let content = match self.content {
            Some(content) => content,
            None => Arc::new(SledContentStore::open(&self.db)?),
        };
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        Ok(DocumentStore::new(
            self.db,
            self.config,
            signer,
            content,
            clock,
        ))
    }
}
