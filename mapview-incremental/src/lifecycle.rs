//! Provisioning and teardown of the stores backing a view
//!
//! Every view owns two private stores: the index and the checkpoints.
//! Named views keep theirs across queries. Temporary views get freshly
//! named stores that are destroyed once the query finishes, whichever way
//! it finishes.

use crate::error::Result;
use crate::view::ViewDefinition;
use mapview_store::{DocumentStore, StoreProvider};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Names of the two stores backing one view
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreNames {
    pub index: String,
    pub checkpoints: String,
}

impl StoreNames {
    /// Stores of a named view; `/` in any component becomes `_`
    pub fn named(prefix: &str, source: &str, design: &str, view: &str) -> Self {
        Self::from_base(format!("{prefix}{source}_{design}_{view}").replace('/', "_"))
    }

    /// Stores of a temporary view, unique per call
    pub fn temporary(prefix: &str, source: &str) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self::from_base(format!("{prefix}{source}_temp_{suffix}").replace('/', "_"))
    }

    fn from_base(base: String) -> Self {
        StoreNames {
            index: format!("{base}-index"),
            checkpoints: format!("{base}-checkpoints"),
        }
    }

    pub fn all(&self) -> [&str; 2] {
        [&self.index, &self.checkpoints]
    }
}

/// An opened view: its definition and the stores holding its state
#[derive(Clone)]
pub struct ViewHandle {
    name: String,
    definition: ViewDefinition,
    stores: StoreNames,
    index: Arc<dyn DocumentStore>,
    checkpoints: Arc<dyn DocumentStore>,
    ephemeral: bool,
}

impl ViewHandle {
    /// Open (creating if needed) the stores in `stores`
    pub async fn open(
        provider: &dyn StoreProvider,
        name: impl Into<String>,
        definition: ViewDefinition,
        stores: StoreNames,
        ephemeral: bool,
    ) -> Result<Self> {
        let index = provider.open(&stores.index).await?;
        let checkpoints = provider.open(&stores.checkpoints).await?;
        let name = name.into();
        debug!(view = %name, index = %stores.index, ephemeral, "Opened view stores");

        Ok(ViewHandle {
            name,
            definition,
            stores,
            index,
            checkpoints,
            ephemeral,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn definition(&self) -> &ViewDefinition {
        &self.definition
    }

    pub fn stores(&self) -> &StoreNames {
        &self.stores
    }

    pub fn index(&self) -> &Arc<dyn DocumentStore> {
        &self.index
    }

    pub fn checkpoints(&self) -> &Arc<dyn DocumentStore> {
        &self.checkpoints
    }

    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral
    }

    /// Release the handle; stores of an ephemeral view are destroyed
    pub async fn close(self, provider: &dyn StoreProvider) -> Result<()> {
        if self.ephemeral {
            destroy_all(provider, &self.stores).await?;
        }
        Ok(())
    }
}

impl fmt::Debug for ViewHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewHandle")
            .field("name", &self.name)
            .field("stores", &self.stores)
            .field("ephemeral", &self.ephemeral)
            .finish_non_exhaustive()
    }
}

/// Destroy both stores, attempting the second even if the first fails
pub async fn destroy_all(provider: &dyn StoreProvider, stores: &StoreNames) -> Result<()> {
    let mut first_error = None;
    for name in stores.all() {
        if let Err(err) = provider.destroy(name).await {
            warn!(store = %name, error = %err, "Failed to destroy view store");
            if first_error.is_none() {
                first_error = Some(err);
            }
        }
    }
    match first_error {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

/// Destroys temporary stores if the owning query is dropped before it
/// cleaned up after itself
pub struct CleanupGuard {
    provider: Arc<dyn StoreProvider>,
    stores: Option<StoreNames>,
}

impl CleanupGuard {
    pub fn new(provider: Arc<dyn StoreProvider>, stores: StoreNames) -> Self {
        CleanupGuard {
            provider,
            stores: Some(stores),
        }
    }

    /// Cleanup ran to completion; nothing left to do on drop
    pub fn disarm(mut self) {
        self.stores = None;
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        let Some(stores) = self.stores.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                debug!(index = %stores.index, "Scheduling cleanup of abandoned temporary view");
                let provider = Arc::clone(&self.provider);
                runtime.spawn(async move {
                    let _ = destroy_all(provider.as_ref(), &stores).await;
                });
            }
            Err(_) => {
                warn!(index = %stores.index, "No runtime available to clean up temporary view");
            }
        }
    }
}

impl fmt::Debug for CleanupGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CleanupGuard")
            .field("stores", &self.stores)
            .finish_non_exhaustive()
    }
}
