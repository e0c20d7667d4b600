use std::{env, sync::Once};

use docsink::{
    config,
    embedding::get_embedding_client,
    ingest::{Descriptor, ExistenceProbe, ImportSettings, Importer, StoreImporter},
    store::{Credentials, DocumentStore, QdrantConnectionFactory},
};

static INIT: Once = Once::new();

fn set_default_env(key: &str, value: &str) {
    let needs_value = env::var(key).map(|v| v.trim().is_empty()).unwrap_or(true);
    if needs_value {
        // SAFETY: Tests run serially via Once and we intentionally mutate process env.
        unsafe {
            env::set_var(key, value);
        }
    }
}

fn init_config_once() {
    INIT.call_once(|| {
        set_default_env("QDRANT_URL", "http://127.0.0.1:6333");
        set_default_env("QDRANT_DOCUMENT_COLLECTION", "docsink-live-documents");
        set_default_env("QDRANT_CHUNK_COLLECTION", "docsink-live-chunks");
        set_default_env("EMBEDDING_PROVIDER", "ollama");
        set_default_env("EMBEDDING_MODEL", "nomic-embed-text");
        set_default_env("EMBEDDING_DIMENSION", "64");
        config::init_config();
    });
}

#[tokio::test]
#[ignore = "Requires live Qdrant"]
async fn live_qdrant_connection() {
    init_config_once();
    let config = config::get_config();
    let factory = QdrantConnectionFactory::new(get_embedding_client(config));
    let store = factory
        .open(&Credentials::from_config(config))
        .await
        .expect("Qdrant should be reachable");
    store
        .collection_exists(&config.document_collection)
        .await
        .expect("collection lookup");
}

#[tokio::test]
#[ignore = "Requires live Qdrant"]
async fn live_import_is_verifiable() {
    init_config_once();
    let config = config::get_config();
    let embedder = get_embedding_client(config);
    let factory = QdrantConnectionFactory::new(embedder.clone());
    let store = factory
        .open(&Credentials::from_config(config))
        .await
        .expect("Qdrant should be reachable");

    let descriptor = Descriptor::parse(
        "live-1",
        r#"{"id":"live-1","name":"live-check.txt","content":"docsink live validation"}"#,
    )
    .expect("descriptor");
    let importer = StoreImporter::new(embedder, ImportSettings::from_config(config));
    importer
        .import(store.as_ref(), &descriptor)
        .await
        .expect("import");

    let outcome = ExistenceProbe::new(config.document_collection.as_str())
        .verify(store.as_ref(), &descriptor)
        .await;
    assert!(outcome.found, "imported document should be found: {outcome:?}");
}
