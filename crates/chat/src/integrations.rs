use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;

use crate::message::{DataSource, Integration};

/// What a toggle request resolved to, given the current connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleAction {
    Connect(DataSource),
    Disconnect(DataSource),
}

impl ToggleAction {
    pub fn data_source(&self) -> DataSource {
        match self {
            Self::Connect(source) | Self::Disconnect(source) => *source,
        }
    }
}

/// Connected data sources, unique by [`DataSource`].
///
/// Backend calls happen outside; the registry only decides which call to make
/// and applies its result. A data source with a call in flight refuses new
/// toggles until that call finishes.
#[derive(Debug, Clone, Default)]
pub struct IntegrationRegistry {
    connected: BTreeMap<DataSource, Integration>,
    in_flight: BTreeSet<DataSource>,
}

impl IntegrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace_all(&mut self, integrations: Vec<Integration>) {
        self.connected = integrations
            .into_iter()
            .map(|integration| (integration.data_source, integration))
            .collect();
    }

    pub fn is_connected(&self, source: DataSource) -> bool {
        self.connected.contains_key(&source)
    }

    pub fn is_busy(&self, source: DataSource) -> bool {
        self.in_flight.contains(&source)
    }

    pub fn connected(&self) -> impl Iterator<Item = &Integration> {
        self.connected.values()
    }

    pub fn len(&self) -> usize {
        self.connected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connected.is_empty()
    }

    /// Claims `source` for one backend call, or `None` if a call is pending.
    pub fn begin_toggle(&mut self, source: DataSource) -> Option<ToggleAction> {
        if !self.in_flight.insert(source) {
            tracing::debug!(data_source = %source, "toggle ignored while a call is in flight");
            return None;
        }

        Some(if self.is_connected(source) {
            ToggleAction::Disconnect(source)
        } else {
            ToggleAction::Connect(source)
        })
    }

    /// Applies a connect result. Returns true when the set changed.
    pub fn finish_connect<E: Display>(
        &mut self,
        source: DataSource,
        result: Result<Integration, E>,
    ) -> bool {
        self.in_flight.remove(&source);
        match result {
            Ok(integration) => {
                let key = integration.data_source;
                let changed = self.connected.get(&key) != Some(&integration);
                self.connected.insert(key, integration);
                changed
            }
            Err(error) => {
                tracing::error!(data_source = %source, error = %error, "failed to connect data source");
                false
            }
        }
    }

    /// Applies a disconnect result. Returns true when the set changed.
    pub fn finish_disconnect<E: Display>(
        &mut self,
        source: DataSource,
        result: Result<(), E>,
    ) -> bool {
        self.in_flight.remove(&source);
        match result {
            Ok(()) => self.connected.remove(&source).is_some(),
            Err(error) => {
                tracing::error!(data_source = %source, error = %error, "failed to disconnect data source");
                false
            }
        }
    }
}
