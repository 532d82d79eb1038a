use crate::config::ServiceDefinition;
use crate::error::StorageError;
use crate::models::Service;
use crate::storage::Storage;
use std::collections::BTreeMap;
use tracing::info;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub created: usize,
    pub updated: usize,
}

/// Registers each definition, matching existing services by URL.
pub fn sync_services(
    storage: &Storage,
    definitions: &[ServiceDefinition],
) -> Result<SyncSummary, StorageError> {
    info!("Syncing {} services from config", definitions.len());

    let mut summary = SyncSummary::default();
    for definition in definitions {
        let upserted = storage.upsert_service_by_url(
            &definition.name,
            &definition.url,
            definition.expected_version.as_deref(),
            definition.environment.as_deref(),
        )?;
        if upserted.created {
            summary.created += 1;
            info!("Created service: {}", definition.name);
        } else {
            summary.updated += 1;
            info!("Updated service: {}", definition.name);
        }
    }

    Ok(summary)
}

/// Maps every stored service id to the ids of the services it depends on.
///
/// Definitions are matched to services by name. Dependencies naming an
/// unknown service are dropped, and services without a definition map to an
/// empty list.
pub fn dependency_map(
    services: &[Service],
    definitions: &[ServiceDefinition],
) -> BTreeMap<String, Vec<String>> {
    let ids_by_name = services
        .iter()
        .map(|service| (service.name.as_str(), service.id.as_str()))
        .collect::<BTreeMap<_, _>>();

    services
        .iter()
        .map(|service| {
            let depends_on = definitions
                .iter()
                .find(|definition| definition.name == service.name)
                .map(|definition| {
                    definition
                        .depends_on
                        .iter()
                        .filter_map(|name| ids_by_name.get(name.as_str()))
                        .map(|id| id.to_string())
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();
            (service.id.clone(), depends_on)
        })
        .collect()
}
