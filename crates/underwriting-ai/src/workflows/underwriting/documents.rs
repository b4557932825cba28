use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::domain::{Application, ApplicationId};

/// A medical document available for an application.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentDescriptor {
    pub name: String,
    pub url: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DocumentStoreError {
    #[error("document store rejected the credentials")]
    Unauthorized,
    #[error("no documents for application {0}")]
    NotFound(ApplicationId),
    #[error("document store unavailable: {0}")]
    Unavailable(String),
}

/// Read-only lookup of per-application document listings.
pub trait DocumentStore: Send + Sync {
    fn list(&self, application_id: &ApplicationId)
        -> Result<Vec<DocumentDescriptor>, DocumentStoreError>;
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryDocumentStore {
    documents: Arc<Mutex<HashMap<ApplicationId, Vec<DocumentDescriptor>>>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, application_id: ApplicationId, documents: Vec<DocumentDescriptor>) {
        self.documents
            .lock()
            .expect("document store mutex poisoned")
            .insert(application_id, documents);
    }

    /// Registers the documents an application carries inline.
    pub fn register(&self, application: &Application, registered_at: DateTime<Utc>) {
        let documents = application
            .medical_documents
            .iter()
            .map(|document| DocumentDescriptor {
                name: document.name.clone(),
                url: document.url.clone().unwrap_or_else(|| {
                    format!("memory://{}/{}", application.application_id, document.name)
                }),
                content_type: content_type_for(&document.name).to_string(),
                size_bytes: 0,
                last_modified: registered_at,
            })
            .collect();
        self.insert(application.application_id.clone(), documents);
    }
}

impl DocumentStore for InMemoryDocumentStore {
    fn list(
        &self,
        application_id: &ApplicationId,
    ) -> Result<Vec<DocumentDescriptor>, DocumentStoreError> {
        self.documents
            .lock()
            .expect("document store mutex poisoned")
            .get(application_id)
            .cloned()
            .ok_or_else(|| DocumentStoreError::NotFound(application_id.clone()))
    }
}

fn content_type_for(name: &str) -> &'static str {
    let extension = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "json" => "application/json",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}
