//! Scenario tests for indexing, search and the app facade.
//!
//! The embedding service is replaced by [`MockEmbedder`]: content of the
//! form `vec:1,0,0.5` embeds to exactly that vector, anything else to a
//! small deterministic vector derived from its bytes.

mod search;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, UNIX_EPOCH};

use crate::semantic::{
    DocumentExtractor, Embedder, EmbeddingError, IncrementalIndexer, IndexStore,
};
use crate::storage::BackendLocal;

#[derive(Default)]
pub struct MockEmbedder {
    pub text_calls: AtomicUsize,
    pub image_calls: AtomicUsize,
    pub query_image_calls: AtomicUsize,
    pub last_text: Mutex<Option<String>>,
    unavailable: AtomicBool,
    fail_containing: Mutex<Option<String>>,
    delay: Mutex<Duration>,
}

impl MockEmbedder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Content containing `needle` gets a service error.
    pub fn fail_on(&self, needle: Option<&str>) {
        *self.fail_containing.lock().unwrap() = needle.map(String::from);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn total_calls(&self) -> usize {
        self.text_calls.load(Ordering::SeqCst)
            + self.image_calls.load(Ordering::SeqCst)
            + self.query_image_calls.load(Ordering::SeqCst)
    }

    fn embed(&self, content: &str) -> Result<Vec<f32>, EmbeddingError> {
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        if self.unavailable.load(Ordering::SeqCst) {
            return Err(EmbeddingError::ServiceUnavailable("connection refused".into()));
        }

        if let Some(needle) = self.fail_containing.lock().unwrap().as_deref() {
            if content.contains(needle) {
                return Err(EmbeddingError::ServiceError {
                    status: 500,
                    message: "model exploded".into(),
                });
            }
        }

        Ok(vector_for(content))
    }
}

pub fn vector_for(content: &str) -> Vec<f32> {
    if let Some(values) = content.trim().strip_prefix("vec:") {
        return values
            .split(',')
            .map(|v| v.trim().parse::<f32>().unwrap())
            .collect();
    }

    let bytes = content.as_bytes();
    let sum: u32 = bytes.iter().map(|b| *b as u32).sum();
    vec![1.0, bytes.len() as f32, (sum % 97) as f32]
}

impl Embedder for MockEmbedder {
    fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.text_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_text.lock().unwrap() = Some(text.to_string());
        self.embed(text)
    }

    fn embed_image(&self, bytes: &[u8]) -> Result<Vec<f32>, EmbeddingError> {
        self.image_calls.fetch_add(1, Ordering::SeqCst);
        self.embed(&String::from_utf8_lossy(bytes))
    }

    fn embed_query_for_images(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.query_image_calls.fetch_add(1, Ordering::SeqCst);
        self.embed(text)
    }
}

pub fn write_file(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

/// A minimal presentation holding only the slide parts text is read from.
/// Each slide is a list of paragraphs; markup in them is written as is.
pub fn write_pptx(path: &Path, slides: &[Vec<String>]) {
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let mut zip = zip::ZipWriter::new(std::fs::File::create(path).unwrap());
    zip.start_file("[Content_Types].xml", SimpleFileOptions::default())
        .unwrap();
    zip.write_all(b"<Types/>").unwrap();

    for (i, paragraphs) in slides.iter().enumerate() {
        let body: String = paragraphs
            .iter()
            .map(|p| format!("<a:p><a:r><a:rPr lang=\"en-US\"/><a:t>{p}</a:t></a:r></a:p>"))
            .collect();
        let xml = format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
             <p:sld xmlns:a=\"a\" xmlns:p=\"p\"><p:cSld><p:spTree><p:sp><p:txBody>\
             {body}</p:txBody></p:sp></p:spTree></p:cSld></p:sld>"
        );
        zip.start_file(format!("ppt/slides/slide{}.xml", i + 1), SimpleFileOptions::default())
            .unwrap();
        zip.write_all(xml.as_bytes()).unwrap();
    }
    zip.finish().unwrap();
}

pub fn set_mtime(path: &Path, secs: u64) {
    std::fs::File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(UNIX_EPOCH + Duration::from_secs(secs))
        .unwrap();
}

pub fn key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// A data directory, a folder of files and an indexer wired to a mock.
pub struct Fixture {
    pub _tmp: tempfile::TempDir,
    pub docs: PathBuf,
    pub data: PathBuf,
    pub embedder: Arc<MockEmbedder>,
    pub store: Arc<IndexStore>,
    pub indexer: IncrementalIndexer,
}

impl Fixture {
    pub fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let docs = tmp.path().join("docs");
        let data = tmp.path().join("data");
        std::fs::create_dir_all(&docs).unwrap();

        let embedder = MockEmbedder::new();
        let store = Self::open_store(&data);
        let indexer = Self::indexer(store.clone(), embedder.clone());

        Self {
            _tmp: tmp,
            docs,
            data,
            embedder,
            store,
            indexer,
        }
    }

    pub fn open_store(data: &Path) -> Arc<IndexStore> {
        let backend = Arc::new(BackendLocal::new(data).unwrap());
        Arc::new(IndexStore::open(backend, "file_index.json"))
    }

    pub fn indexer(store: Arc<IndexStore>, embedder: Arc<MockEmbedder>) -> IncrementalIndexer {
        IncrementalIndexer::new(
            store,
            embedder,
            Arc::new(DocumentExtractor),
            vec!["txt".into(), "pdf".into(), "pptx".into()],
            vec!["png".into(), "jpg".into()],
        )
    }

    /// Write `content` to `name` under the docs folder with a fixed mtime.
    pub fn file(&self, name: &str, content: &str, mtime: u64) -> PathBuf {
        let path = self.docs.join(name);
        write_file(&path, content);
        set_mtime(&path, mtime);
        path
    }
}
