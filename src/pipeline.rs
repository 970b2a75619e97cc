/// Publish pipeline orchestrator.
///
/// Coordinates the full publish flow for one document:
/// 1. Clean up the snapshot (frontmatter, links, heading anchors)
/// 2. Queue local media and resolve it against the server (dedup by digest)
/// 3. Publish the page stylesheet, unless the server already holds it
/// 4. Build the note template, encrypting the body unless publishing plain
/// 5. Upload the note under the document's stable filename
/// 6. Record the link in the publish index
///
/// The index and the returned metadata only change after step 5 succeeds,
/// so a failed publish never rewrites a document's stored link.
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use rand::RngCore;
use tracing::{debug, info, warn};

use crate::assets::{
    extract_css_assets, extract_media_assets, split_css_into_chunks, AssetSource, ImageCompressor,
    MediaScan,
};
use crate::config::{PublishConfig, TitleSource};
use crate::crypto::{self, ContentDigest, DecryptionKey, EncryptedPayload};
use crate::document::links::{rewrite_links, LinkStats};
use crate::document::{DocumentSnapshot, ElementStyle, NoteMetadata};
use crate::error::{PublishError, Result};
use crate::index::{parse_share_url, PublishIndex, PublishedLink};
use crate::queue::{AssetTransform, BatchResult, Progress, ProgressSink, UploadQueue};
use crate::storage::{CreateNoteRequest, RemoteStore, NOTE_FILETYPE};
use crate::template::{self, CssFile, CssPublishResult, NotePlaintext, NoteTemplate};

/// Per-call publish switches.
#[derive(Debug, Clone, Copy)]
pub struct PublishOptions {
    /// Encrypt the note body; the key travels in the link fragment.
    pub encrypt: bool,
    /// Upload the stylesheet even if the server already has one.
    pub force_css: bool,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            encrypt: true,
            force_css: false,
        }
    }
}

/// Result of a successful publish.
#[derive(Debug, Clone)]
pub struct PublishOutcome {
    pub link: PublishedLink,
    /// Metadata the host should write back to the document.
    pub metadata: NoteMetadata,
    pub css: Option<CssPublishResult>,
    pub media: MediaScan,
    pub links: LinkStats,
    /// Unique assets the server already had.
    pub assets_existing: usize,
    /// Unique assets uploaded by this publish.
    pub assets_uploaded: usize,
}

impl PublishOutcome {
    pub fn share_link(&self) -> String {
        self.link.share_link()
    }
}

/// Marks a document as being published; released on drop.
struct InFlight<'a> {
    set: &'a Mutex<HashSet<String>>,
    path: String,
}

impl<'a> InFlight<'a> {
    fn acquire(set: &'a Mutex<HashSet<String>>, path: &str) -> Result<Self> {
        let mut active = set.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !active.insert(path.to_string()) {
            return Err(PublishError::Known(format!(
                "{path} is already publishing, please wait."
            )));
        }
        Ok(Self {
            set,
            path: path.to_string(),
        })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.path);
    }
}

pub struct Publisher {
    config: PublishConfig,
    store: Arc<dyn RemoteStore>,
    source: Arc<dyn AssetSource>,
    transform: Option<Arc<dyn AssetTransform>>,
    in_flight: Mutex<HashSet<String>>,
}

impl Publisher {
    pub fn new(
        config: PublishConfig,
        store: Arc<dyn RemoteStore>,
        source: Arc<dyn AssetSource>,
    ) -> Result<Self> {
        config.validate()?;
        let transform: Option<Arc<dyn AssetTransform>> = if config.compress_images {
            Some(Arc::new(ImageCompressor::default()))
        } else {
            None
        };
        Ok(Self {
            config,
            store,
            source,
            transform,
            in_flight: Mutex::new(HashSet::new()),
        })
    }

    /// Transform media (not stylesheets) before upload, replacing the
    /// default image compressor.
    pub fn with_transform(mut self, transform: Arc<dyn AssetTransform>) -> Self {
        self.transform = Some(transform);
        self
    }

    pub fn config(&self) -> &PublishConfig {
        &self.config
    }

    fn media_queue(&self) -> UploadQueue {
        let queue = UploadQueue::new(self.config.upload_concurrency);
        match &self.transform {
            Some(transform) => queue.with_transform(transform.clone()),
            None => queue,
        }
    }

    /// Publish one document.
    pub async fn publish(
        &self,
        snapshot: DocumentSnapshot,
        index: &mut PublishIndex,
        options: PublishOptions,
        progress: &dyn ProgressSink,
    ) -> Result<PublishOutcome> {
        let _guard = InFlight::acquire(&self.in_flight, &snapshot.path)?;
        let mut doc = snapshot;

        info!(
            path = %doc.path,
            store = self.store.name(),
            encrypt = options.encrypt,
            "Starting publish"
        );

        // 1. Clean up the snapshot
        if self.config.remove_frontmatter {
            doc.strip_frontmatter();
        }
        let links = rewrite_links(&mut doc.content, index);
        debug!(?links, "Links rewritten");

        // 2. Media
        progress.report(Progress::Stage("Processing attachments"));
        let mut queue = self.media_queue();
        let media = extract_media_assets(&mut doc.content, self.source.as_ref(), &mut queue).await;
        let batch = queue.drain(self.store.as_ref(), progress).await?;
        ensure_complete(&batch)?;
        batch.apply_to_element(&mut doc.content);

        // 3. Stylesheet
        let css = if doc.css.trim().is_empty() {
            None
        } else if batch.remote_css.is_some() && !options.force_css {
            debug!("Stylesheet already hosted, skipping upload");
            None
        } else {
            progress.report(Progress::Stage("Uploading stylesheet"));
            self.publish_css(&doc.css, progress).await?
        };

        // 4. Template
        let existing = self.identity(&doc, index);
        let filename = existing
            .as_ref()
            .map(|link| link.filename.clone())
            .unwrap_or_else(new_filename);
        let title = self.title(&doc);

        let mut note = NoteTemplate {
            filename: filename.clone(),
            width: self.config.note_width.clone(),
            elements: self.element_styles(&doc.elements),
            math_jax: template::has_math(&doc.content),
            show_footer: self.config.show_footer,
            ..Default::default()
        };
        note.set_css(css.as_ref());

        let html = doc.content.inner_html();
        let decryption_key = if options.encrypt {
            progress.report(Progress::Stage("Encrypting"));
            let key = existing.as_ref().and_then(recover_key);
            let plaintext = serde_json::to_string(&NotePlaintext {
                content: html,
                basename: title,
            })?;
            let envelope = crypto::encrypt(&plaintext, key, self.config.cipher_chunk_size)?;
            note.encrypted = true;
            note.content = serde_json::to_string(&envelope.payload)?;
            envelope.key_string()
        } else {
            note.description = template::description_from(&doc.content);
            note.title = title;
            note.content = html;
            String::new()
        };

        // 5. Upload the note
        progress.report(Progress::Stage("Uploading note"));
        let request = CreateNoteRequest {
            filename: filename.clone(),
            filetype: NOTE_FILETYPE.to_string(),
            hash: ContentDigest::of(serde_json::to_vec(&note)?).wire_hash(),
            expiration: self.config.expiration.clone(),
            template: note,
        };
        let url = self.store.create_note(&request).await?;

        // 6. Record
        let link = PublishedLink {
            filename: parse_share_url(&url).map(|p| p.filename).unwrap_or(filename),
            decryption_key,
            url,
        };
        index.insert(doc.path.clone(), link.clone());
        let metadata = NoteMetadata {
            link: Some(link.share_link()),
            updated: Some(Utc::now()),
            title: doc.metadata.title.clone(),
        };

        info!(
            path = %doc.path,
            filename = %link.filename,
            assets_uploaded = batch.uploaded,
            css_files = css.as_ref().map(|c| c.files().len()).unwrap_or(0),
            "Publish complete"
        );

        Ok(PublishOutcome {
            link,
            metadata,
            css,
            media,
            links,
            assets_existing: batch.existing,
            assets_uploaded: batch.uploaded,
        })
    }

    /// Delete a published document from the server and forget its link.
    pub async fn unpublish(&self, path: &str, index: &mut PublishIndex) -> Result<PublishedLink> {
        let _guard = InFlight::acquire(&self.in_flight, path)?;
        let link = index
            .get(path)
            .cloned()
            .ok_or_else(|| PublishError::Known(format!("{path} is not published.")))?;

        self.store.delete_note(&link.filename).await?;
        index.remove(path);
        info!(path = %path, filename = %link.filename, "Note unpublished");
        Ok(link)
    }

    /// Rehost stylesheet assets, then upload the stylesheet in chunks.
    async fn publish_css(
        &self,
        css: &str,
        progress: &dyn ProgressSink,
    ) -> Result<Option<CssPublishResult>> {
        let mut assets = UploadQueue::new(self.config.upload_concurrency);
        let css = extract_css_assets(css, self.source.as_ref(), &mut assets).await;
        let batch = assets.drain(self.store.as_ref(), progress).await?;
        ensure_complete(&batch)?;
        let css = batch.apply(&css).replace(['\n', '\r'], "");

        let mut chunks = UploadQueue::new(self.config.upload_concurrency);
        let placed: Vec<(String, String)> = split_css_into_chunks(&css, self.config.css_chunk_size)
            .into_iter()
            .map(|chunk| {
                let hash = ContentDigest::of(chunk.as_bytes()).wire_hash();
                (chunks.enqueue("css", chunk.into_bytes()), hash)
            })
            .collect();
        let uploaded = chunks.drain(self.store.as_ref(), progress).await?;
        ensure_complete(&uploaded)?;

        let files = placed
            .into_iter()
            .map(|(placeholder, hash)| {
                uploaded.url_for(&placeholder).map(|url| CssFile {
                    url: url.to_string(),
                    hash,
                })
            })
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| PublishError::Unknown("stylesheet chunk did not resolve".into()))?;

        info!(chunks = files.len(), bytes = css.len(), "Stylesheet published");
        Ok(CssPublishResult::from_files(files))
    }

    /// The link this document was last published under, if any.
    fn identity(&self, doc: &DocumentSnapshot, index: &PublishIndex) -> Option<PublishedLink> {
        doc.metadata
            .link
            .as_deref()
            .and_then(PublishedLink::from_share_url)
            .or_else(|| index.get(&doc.path).cloned())
    }

    fn title(&self, doc: &DocumentSnapshot) -> String {
        let title = match self.config.title_source {
            TitleSource::Basename => None,
            TitleSource::FirstHeading => doc
                .content
                .find(|el| el.tag == "h1")
                .map(|h1| h1.text_content().trim().to_string()),
            TitleSource::Frontmatter => doc.metadata.title.as_ref().map(|t| t.trim().to_string()),
        };
        title
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| doc.basename().to_string())
    }

    /// Captured wrapper styles, with the theme mode applied to `body`.
    fn element_styles(&self, elements: &[ElementStyle]) -> Vec<ElementStyle> {
        let Some(forced) = self.config.theme_mode.body_class() else {
            return elements.to_vec();
        };
        elements
            .iter()
            .cloned()
            .map(|mut style| {
                if style.element == "body" {
                    style
                        .classes
                        .retain(|c| c != "theme-dark" && c != "theme-light");
                    style.classes.push(forced.to_string());
                }
                style
            })
            .collect()
    }
}

fn ensure_complete(batch: &BatchResult) -> Result<()> {
    if batch.is_complete() {
        Ok(())
    } else {
        Err(PublishError::AssetUploads {
            failed: batch.failures.clone(),
        })
    }
}

fn recover_key(link: &PublishedLink) -> Option<DecryptionKey> {
    if !link.is_encrypted() {
        return None;
    }
    match DecryptionKey::decode(&link.decryption_key) {
        Ok(key) => Some(key),
        Err(e) => {
            warn!(filename = %link.filename, error = %e, "Stored key is unusable, issuing a new one");
            None
        }
    }
}

fn new_filename() -> String {
    let mut seed = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut seed);
    ContentDigest::of(seed).stem()
}

/// Decrypt a published note body (`template.content`) with its link key.
pub fn open_note(content: &str, key: &str) -> Result<NotePlaintext> {
    let payload: EncryptedPayload = serde_json::from_str(content)?;
    let key = DecryptionKey::decode(key)?;
    let plaintext = crypto::decrypt(&payload, &key)?;
    Ok(serde_json::from_str(&plaintext)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::FetchedAsset;
    use crate::config::ThemeMode;
    use crate::crypto::ApiSecret;
    use crate::document::Element;
    use crate::storage::memory::MemoryStore;
    use async_trait::async_trait;
    use std::collections::HashMap;

    const PNG: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 7, 7];

    #[derive(Default)]
    struct MapSource(HashMap<String, Vec<u8>>);

    #[async_trait]
    impl AssetSource for MapSource {
        async fn fetch(&self, url: &str) -> Result<FetchedAsset> {
            self.0
                .get(url)
                .map(|data| FetchedAsset {
                    data: data.clone(),
                    content_type: None,
                })
                .ok_or_else(|| PublishError::Known(format!("missing {url}")))
        }
    }

    fn config() -> PublishConfig {
        PublishConfig {
            uid: "user".into(),
            api_key: ApiSecret::new("secret"),
            cipher_chunk_size: 64,
            css_chunk_size: 32,
            ..Default::default()
        }
    }

    fn setup(config: PublishConfig) -> (Arc<MemoryStore>, Publisher) {
        let store = Arc::new(MemoryStore::new("https://share.test"));
        let mut files = HashMap::new();
        files.insert("app://local/photo.png".to_string(), PNG.to_vec());
        files.insert("fonts/a.woff2".to_string(), b"wOF2font".to_vec());
        let publisher = Publisher::new(config, store.clone(), Arc::new(MapSource(files))).unwrap();
        (store, publisher)
    }

    fn snapshot() -> DocumentSnapshot {
        let content = Element::new("div")
            .with_child(
                Element::new("div")
                    .with_attr("class", "metadata-container")
                    .with_text("tags: private"),
            )
            .with_child(Element::new("h1").with_text("Heading One"))
            .with_child(Element::new("p").with_text("Body text of the note."))
            .with_child(
                Element::new("img")
                    .with_attr("src", "app://local/photo.png")
                    .with_attr("alt", "photo.png"),
            );
        let mut doc = DocumentSnapshot::new("notes/My Note.md", content);
        doc.css = ".a{color:red}.b{color:blue}@font-face{src:url(fonts/a.woff2)}".into();
        doc.elements = vec![ElementStyle {
            element: "body".into(),
            classes: vec!["theme-dark".into(), "mod-windows".into()],
            style: String::new(),
        }];
        doc
    }

    #[tokio::test]
    async fn test_publish_encrypted_note() {
        let (store, publisher) = setup(config());
        let mut index = PublishIndex::new();

        let outcome = publisher
            .publish(snapshot(), &mut index, PublishOptions::default(), &())
            .await
            .unwrap();

        assert!(outcome.link.is_encrypted());
        assert_eq!(outcome.metadata.link.as_deref(), Some(outcome.share_link().as_str()));
        assert_eq!(index.get("notes/My Note.md"), Some(&outcome.link));
        assert_eq!(outcome.media.enqueued, 1);

        let note = store.note(&outcome.link.filename).unwrap();
        assert!(note.template.encrypted);
        assert!(note.template.title.is_empty());
        assert!(!note.template.content.contains("Body text"));
        let css = note.template.css.clone().unwrap();
        assert!(css.len() > 1);

        let opened = open_note(&note.template.content, &outcome.link.decryption_key).unwrap();
        assert_eq!(opened.basename, "My Note");
        assert!(opened.content.contains("Body text of the note."));
        assert!(!opened.content.contains("tags: private"));
        assert!(!opened.content.contains("alt="));
        assert!(opened.content.contains("https://share.test/files/"));

        // Font in the stylesheet was rehosted before the chunks were uploaded.
        let uploads = store.uploads();
        assert!(uploads.iter().any(|u| u.filetype == "woff2"));
        let chunks: Vec<_> = uploads.iter().filter(|u| u.filetype == "css").collect();
        let stylesheet: String = chunks
            .iter()
            .map(|u| String::from_utf8(u.content.clone()).unwrap())
            .collect();
        assert!(!stylesheet.contains("fonts/a.woff2"));
        assert!(stylesheet.contains("https://share.test/files/"));
    }

    #[tokio::test]
    async fn test_republish_keeps_filename_and_key() {
        let (_store, publisher) = setup(config());
        let mut index = PublishIndex::new();

        let first = publisher
            .publish(snapshot(), &mut index, PublishOptions::default(), &())
            .await
            .unwrap();

        let mut again = snapshot();
        again.metadata = first.metadata.clone();
        let second = publisher
            .publish(again, &mut index, PublishOptions::default(), &())
            .await
            .unwrap();
        assert_eq!(second.link.filename, first.link.filename);
        assert_eq!(second.link.decryption_key, first.link.decryption_key);

        // The index alone is enough to recover the identity.
        let third = publisher
            .publish(snapshot(), &mut index, PublishOptions::default(), &())
            .await
            .unwrap();
        assert_eq!(third.share_link(), first.share_link());
        assert_eq!(index.len(), 1);
    }

    #[tokio::test]
    async fn test_plaintext_publish() {
        let (store, publisher) = setup(PublishConfig {
            title_source: TitleSource::FirstHeading,
            theme_mode: ThemeMode::Light,
            ..config()
        });
        let mut index = PublishIndex::new();
        let options = PublishOptions {
            encrypt: false,
            ..Default::default()
        };

        let outcome = publisher
            .publish(snapshot(), &mut index, options, &())
            .await
            .unwrap();
        assert!(!outcome.link.is_encrypted());
        assert!(!outcome.share_link().contains('#'));

        let note = store.note(&outcome.link.filename).unwrap();
        assert_eq!(note.template.title, "Heading One");
        assert_eq!(note.template.description, "Body text of the note.");
        assert!(note.template.content.contains("Body text"));
        assert_eq!(note.template.elements[0].classes, vec!["mod-windows", "theme-light"]);
        assert_eq!(note.filetype, "html");
        assert_eq!(note.hash.len(), 32);
    }

    #[tokio::test]
    async fn test_hosted_media_and_css_are_not_uploaded() {
        let (store, publisher) = setup(config());
        store.preload(&ContentDigest::of(PNG).wire_hash(), "png", "https://x/y.png");
        store.set_css(CssFile {
            url: "https://share.test/css/user.css".into(),
            hash: "abc".into(),
        });
        let mut index = PublishIndex::new();
        let options = PublishOptions {
            encrypt: false,
            ..Default::default()
        };

        let outcome = publisher
            .publish(snapshot(), &mut index, options, &())
            .await
            .unwrap();
        assert!(store.uploads().is_empty());
        assert!(outcome.css.is_none());
        assert_eq!(outcome.assets_existing, 1);

        let note = store.note(&outcome.link.filename).unwrap();
        assert!(note.template.content.contains("src=\"https://x/y.png\""));
        assert!(note.template.css.is_none());

        let forced = PublishOptions {
            encrypt: false,
            force_css: true,
        };
        let outcome = publisher
            .publish(snapshot(), &mut index, forced, &())
            .await
            .unwrap();
        assert!(outcome.css.is_some());
        assert!(store.uploads().iter().any(|u| u.filetype == "css"));
    }

    #[tokio::test]
    async fn test_failed_asset_blocks_publish() {
        let (store, publisher) = setup(config());
        store.fail_uploads_of(&ContentDigest::of(PNG).wire_hash());
        let mut index = PublishIndex::new();

        let result = publisher
            .publish(snapshot(), &mut index, PublishOptions::default(), &())
            .await;
        match result {
            Err(PublishError::AssetUploads { failed }) => assert_eq!(failed.len(), 1),
            other => panic!("expected asset failure, got {other:?}"),
        }
        assert!(index.is_empty());
    }

    #[tokio::test]
    async fn test_unpublish() {
        let (store, publisher) = setup(config());
        let mut index = PublishIndex::new();
        let outcome = publisher
            .publish(snapshot(), &mut index, PublishOptions::default(), &())
            .await
            .unwrap();

        let removed = publisher.unpublish("notes/My Note.md", &mut index).await.unwrap();
        assert_eq!(removed, outcome.link);
        assert!(index.is_empty());
        assert_eq!(store.deleted(), vec![outcome.link.filename.clone()]);

        assert!(matches!(
            publisher.unpublish("notes/My Note.md", &mut index).await,
            Err(PublishError::Known(_))
        ));
    }

    fn photo_png() -> Vec<u8> {
        let mut state: u32 = 42;
        let img = image::RgbImage::from_fn(400, 400, |_, _| {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            let [r, g, b, _] = state.to_le_bytes();
            image::Rgb([r, g, b])
        });
        let mut out = std::io::Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png).unwrap();
        out.into_inner()
    }

    async fn uploaded_photo_type(config: PublishConfig) -> String {
        let store = Arc::new(MemoryStore::new("https://share.test"));
        let mut files = HashMap::new();
        files.insert("app://local/big.png".to_string(), photo_png());
        let publisher = Publisher::new(config, store.clone(), Arc::new(MapSource(files))).unwrap();

        let content = Element::new("div").with_child(Element::new("img").with_attr("src", "app://local/big.png"));
        let mut index = PublishIndex::new();
        publisher
            .publish(DocumentSnapshot::new("photo.md", content), &mut index, PublishOptions::default(), &())
            .await
            .unwrap();

        let uploads = store.uploads();
        assert_eq!(uploads.len(), 1);
        uploads[0].filetype.clone()
    }

    #[tokio::test]
    async fn test_large_images_are_compressed_unless_disabled() {
        assert_eq!(uploaded_photo_type(config()).await, "jpg");

        let plain = PublishConfig {
            compress_images: false,
            ..config()
        };
        assert_eq!(uploaded_photo_type(plain).await, "png");
    }

    #[test]
    fn test_in_flight_guard() {
        let set = Mutex::new(HashSet::new());
        let first = InFlight::acquire(&set, "a.md").unwrap();
        assert!(matches!(
            InFlight::acquire(&set, "a.md"),
            Err(PublishError::Known(_))
        ));
        assert!(InFlight::acquire(&set, "b.md").is_ok());
        drop(first);
        assert!(InFlight::acquire(&set, "a.md").is_ok());
    }

    #[test]
    fn test_open_note_wrong_key() {
        let envelope = crypto::encrypt(r#"{"content":"x","basename":"y"}"#, None, 8).unwrap();
        let content = serde_json::to_string(&envelope.payload).unwrap();
        assert_eq!(open_note(&content, &envelope.key_string()).unwrap().basename, "y");
        let other = DecryptionKey::generate().encode();
        assert!(matches!(
            open_note(&content, &other),
            Err(PublishError::Decryption(_))
        ));
    }
}
