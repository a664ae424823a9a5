//! Source extraction: turning an item and its attachments into text streams.
//!
//! A text note contributes its markdown body directly. File attachments go
//! through a parser registry keyed by MIME type; images instead get OCR text
//! and a vision caption. Vision providers form an ordered attempt chain, and
//! each is best-effort: provider failures on an image degrade that image's
//! index text rather than failing the whole job. Everything else about an
//! attachment is load-bearing: a fetch or parse failure fails extraction so
//! the job records the error instead of indexing the item partially. Only an
//! attachment no parser claims is skipped.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use lorekeep_core::{
    DocumentParser, Error, ExtractedSource, MediaDescriptor, NotebookItem, NotebookItemFile,
    OcrProvider, Result, SourceType, VisionProvider,
};

/// Fetches raw attachment bytes from wherever `storage_ref` points.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, media: &MediaDescriptor) -> Result<Vec<u8>>;
}

/// Media fetcher reading `storage_ref` as a path under a root directory.
pub struct FsMediaStore {
    root: PathBuf,
}

impl FsMediaStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root from `MEDIA_ROOT`, defaulting to `./media`.
    pub fn from_env() -> Self {
        let root = std::env::var("MEDIA_ROOT").unwrap_or_else(|_| "media".to_string());
        Self::new(root)
    }
}

#[async_trait]
impl MediaFetcher for FsMediaStore {
    async fn fetch(&self, media: &MediaDescriptor) -> Result<Vec<u8>> {
        let storage_ref = media
            .storage_ref
            .as_deref()
            .ok_or_else(|| Error::Extraction(format!("{} has no storage ref", media.filename)))?;
        // Refuse refs that escape the media root.
        let relative = Path::new(storage_ref);
        if relative.is_absolute()
            || relative
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(Error::Extraction(format!(
                "invalid storage ref: {storage_ref}"
            )));
        }
        Ok(tokio::fs::read(self.root.join(relative)).await?)
    }
}

/// Composes parsers and optional OCR/vision providers into one extractor.
pub struct SourceExtractor {
    fetcher: Arc<dyn MediaFetcher>,
    parsers: Vec<Arc<dyn DocumentParser>>,
    ocr: Option<Arc<dyn OcrProvider>>,
    /// Tried in registration order; the first non-empty caption wins.
    vision: Vec<Arc<dyn VisionProvider>>,
}

impl SourceExtractor {
    pub fn new(fetcher: Arc<dyn MediaFetcher>) -> Self {
        Self {
            fetcher,
            parsers: Vec::new(),
            ocr: None,
            vision: Vec::new(),
        }
    }

    pub fn with_parser(mut self, parser: Arc<dyn DocumentParser>) -> Self {
        self.parsers.push(parser);
        self
    }

    pub fn with_ocr(mut self, ocr: Arc<dyn OcrProvider>) -> Self {
        self.ocr = Some(ocr);
        self
    }

    pub fn with_vision(mut self, vision: Arc<dyn VisionProvider>) -> Self {
        self.vision.push(vision);
        self
    }

    /// Extract every indexable text stream for an item.
    ///
    /// The markdown body always comes first, then attachment sources in
    /// attachment order, so chunk indices remain stable across reindexes of
    /// unchanged content.
    pub async fn extract(
        &self,
        item: &NotebookItem,
        files: &[NotebookItemFile],
    ) -> Result<Vec<ExtractedSource>> {
        let mut sources = Vec::new();

        let note_text = match (item.title.trim(), item.content_markdown.trim()) {
            ("", "") => String::new(),
            (title, "") => title.to_string(),
            ("", body) => body.to_string(),
            (title, body) => format!("{title}\n\n{body}"),
        };
        if !note_text.is_empty() {
            sources.push(ExtractedSource {
                text: note_text,
                source_type: SourceType::Note,
                source_locator: None,
            });
        }

        if files.is_empty() {
            // Items uploaded before discrete attachment rows existed carry a
            // single inline media descriptor instead.
            if let Some(media) = &item.media {
                match self.extract_media(media).await {
                    Ok(mut media_sources) => sources.append(&mut media_sources),
                    Err(Error::UnsupportedFileType(mime)) => {
                        warn!(
                            subsystem = "index",
                            component = "extract",
                            item_id = %item.id,
                            filename = %media.filename,
                            mime = %mime,
                            "No parser for inline attachment, skipping"
                        );
                    }
                    Err(e) => return Err(e),
                }
            }
            return Ok(sources);
        }

        for file in files {
            match self.extract_media(&file.media).await {
                Ok(mut file_sources) => sources.append(&mut file_sources),
                Err(Error::UnsupportedFileType(mime)) => {
                    warn!(
                        subsystem = "index",
                        component = "extract",
                        item_id = %item.id,
                        filename = %file.media.filename,
                        mime = %mime,
                        "No parser for attachment, skipping"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Ok(sources)
    }

    async fn extract_media(&self, media: &MediaDescriptor) -> Result<Vec<ExtractedSource>> {
        let data = self.fetcher.fetch(media).await?;
        let mime = resolve_mime(media, &data);

        if mime.starts_with("image/") {
            return Ok(self.extract_image(media, &data, &mime).await);
        }

        if let Some(parser) = self
            .parsers
            .iter()
            .find(|p| p.supported_types().contains(&mime.as_str()))
        {
            return parser.parse(&data, &media.filename).await;
        }

        // Legacy inline fallback: attachments uploaded before parser support
        // existed were stored as plain text.
        if mime.starts_with("text/") {
            return Ok(vec![ExtractedSource {
                text: String::from_utf8_lossy(&data).into_owned(),
                source_type: SourceType::Document,
                source_locator: Some(media.filename.clone()),
            }]);
        }

        Err(Error::UnsupportedFileType(mime))
    }

    /// OCR first, caption second; each section is labeled so chunk text keeps
    /// provenance even after the streams are concatenated. Vision providers
    /// are attempted in order until one returns a non-empty caption.
    async fn extract_image(
        &self,
        media: &MediaDescriptor,
        data: &[u8],
        mime: &str,
    ) -> Vec<ExtractedSource> {
        let mut parts = Vec::new();

        if let Some(ocr) = &self.ocr {
            match ocr.extract_text(data, mime).await {
                Ok(text) if !text.trim().is_empty() => {
                    parts.push(format!("OCR:\n{}", text.trim()));
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(
                        subsystem = "index",
                        component = "extract",
                        filename = %media.filename,
                        error = %e,
                        "OCR failed"
                    );
                }
            }
        }

        for vision in &self.vision {
            match vision.describe(data, mime).await {
                Ok(caption) if !caption.trim().is_empty() => {
                    parts.push(format!("Description:\n{}", caption.trim()));
                    break;
                }
                Ok(_) => {
                    debug!(
                        subsystem = "index",
                        component = "extract",
                        filename = %media.filename,
                        "Empty caption, trying next provider"
                    );
                }
                Err(e) => {
                    warn!(
                        subsystem = "index",
                        component = "extract",
                        filename = %media.filename,
                        error = %e,
                        "Caption failed, trying next provider"
                    );
                }
            }
        }

        if parts.is_empty() {
            debug!(
                subsystem = "index",
                component = "extract",
                filename = %media.filename,
                "Image yielded no text"
            );
            return Vec::new();
        }

        vec![ExtractedSource {
            text: parts.join("\n\n"),
            source_type: SourceType::Image,
            source_locator: Some(media.filename.clone()),
        }]
    }
}

/// Stored MIME type when present, otherwise sniffed from the bytes.
fn resolve_mime(media: &MediaDescriptor, data: &[u8]) -> String {
    if !media.mime_type.is_empty() {
        return media.mime_type.clone();
    }
    infer::get(data)
        .map(|kind| kind.mime_type().to_string())
        .unwrap_or_else(|| "application/octet-stream".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use lorekeep_core::{IndexStatus, ItemStatus, ItemType, SourceScope};
    use uuid::Uuid;

    struct StaticFetcher(Vec<u8>);

    #[async_trait]
    impl MediaFetcher for StaticFetcher {
        async fn fetch(&self, _media: &MediaDescriptor) -> Result<Vec<u8>> {
            Ok(self.0.clone())
        }
    }

    struct FixedOcr(&'static str);

    #[async_trait]
    impl OcrProvider for FixedOcr {
        async fn extract_text(&self, _image: &[u8], _mime: &str) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    struct FailingVision;

    #[async_trait]
    impl VisionProvider for FailingVision {
        async fn describe(&self, _image: &[u8], _mime: &str) -> Result<String> {
            Err(Error::Extraction("vision down".to_string()))
        }
    }

    struct FixedVision(&'static str);

    #[async_trait]
    impl VisionProvider for FixedVision {
        async fn describe(&self, _image: &[u8], _mime: &str) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    struct FailingParser;

    #[async_trait]
    impl DocumentParser for FailingParser {
        fn supported_types(&self) -> &[&str] {
            &["application/pdf"]
        }

        async fn parse(&self, _data: &[u8], _filename: &str) -> Result<Vec<ExtractedSource>> {
            Err(Error::Extraction("corrupt pdf".to_string()))
        }
    }

    fn test_item(content: &str) -> NotebookItem {
        NotebookItem {
            id: Uuid::new_v4(),
            company_id: Uuid::new_v4(),
            owner_user_id: Uuid::new_v4(),
            source_scope: SourceScope::Personal,
            title: String::new(),
            content_markdown: content.to_string(),
            item_type: ItemType::Text,
            media: None,
            is_indexable: true,
            index_status: IndexStatus::Pending,
            index_error: None,
            status: ItemStatus::Active,
            revision: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn test_file(mime: &str) -> NotebookItemFile {
        NotebookItemFile {
            id: Uuid::new_v4(),
            item_id: Uuid::new_v4(),
            media: MediaDescriptor {
                filename: "photo.png".to_string(),
                mime_type: mime.to_string(),
                size_bytes: Some(3),
                storage_ref: Some("photo.png".to_string()),
            },
            is_indexable: true,
            status: ItemStatus::Active,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_title_and_body_form_first_source() {
        let extractor = SourceExtractor::new(Arc::new(StaticFetcher(vec![])));
        let mut item = test_item("# Notes\nbody");
        item.title = "Meeting".to_string();
        let sources = extractor.extract(&item, &[]).await.unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].source_type, SourceType::Note);
        assert_eq!(sources[0].text, "Meeting\n\n# Notes\nbody");
    }

    #[tokio::test]
    async fn test_blank_body_still_indexes_title() {
        let extractor = SourceExtractor::new(Arc::new(StaticFetcher(vec![])));
        let mut item = test_item("  \n");
        item.title = "Just a title".to_string();
        let sources = extractor.extract(&item, &[]).await.unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].text, "Just a title");
    }

    #[tokio::test]
    async fn test_blank_title_and_body_contribute_nothing() {
        let extractor = SourceExtractor::new(Arc::new(StaticFetcher(vec![])));
        let sources = extractor.extract(&test_item("  \n"), &[]).await.unwrap();
        assert!(sources.is_empty());
    }

    #[tokio::test]
    async fn test_image_gets_labeled_ocr_section() {
        let extractor = SourceExtractor::new(Arc::new(StaticFetcher(vec![1, 2, 3])))
            .with_ocr(Arc::new(FixedOcr("whiteboard text")));
        let sources = extractor
            .extract(&test_item(""), &[test_file("image/png")])
            .await
            .unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].source_type, SourceType::Image);
        assert!(sources[0].text.starts_with("OCR:\n"));
        assert!(sources[0].text.contains("whiteboard text"));
        assert_eq!(sources[0].source_locator.as_deref(), Some("photo.png"));
    }

    #[tokio::test]
    async fn test_vision_failure_degrades_not_fails() {
        let extractor = SourceExtractor::new(Arc::new(StaticFetcher(vec![1, 2, 3])))
            .with_ocr(Arc::new(FixedOcr("legible")))
            .with_vision(Arc::new(FailingVision));
        let sources = extractor
            .extract(&test_item(""), &[test_file("image/png")])
            .await
            .unwrap();
        // OCR text survives even though captioning failed.
        assert_eq!(sources.len(), 1);
        assert!(sources[0].text.contains("legible"));
        assert!(!sources[0].text.contains("Description:"));
    }

    #[tokio::test]
    async fn test_vision_chain_falls_through_to_next_provider() {
        let extractor = SourceExtractor::new(Arc::new(StaticFetcher(vec![1, 2, 3])))
            .with_vision(Arc::new(FailingVision))
            .with_vision(Arc::new(FixedVision("a whiteboard photo")));
        let sources = extractor
            .extract(&test_item(""), &[test_file("image/png")])
            .await
            .unwrap();
        assert_eq!(sources.len(), 1);
        assert!(sources[0].text.contains("Description:\na whiteboard photo"));
    }

    #[tokio::test]
    async fn test_vision_chain_stops_at_first_caption() {
        let extractor = SourceExtractor::new(Arc::new(StaticFetcher(vec![1, 2, 3])))
            .with_vision(Arc::new(FixedVision("primary caption")))
            .with_vision(Arc::new(FixedVision("fallback caption")));
        let sources = extractor
            .extract(&test_item(""), &[test_file("image/png")])
            .await
            .unwrap();
        assert!(sources[0].text.contains("primary caption"));
        assert!(!sources[0].text.contains("fallback caption"));
    }

    #[tokio::test]
    async fn test_inline_media_used_when_no_file_rows() {
        let mut item = test_item("");
        item.item_type = ItemType::File;
        item.media = Some(MediaDescriptor {
            filename: "legacy.txt".to_string(),
            mime_type: "text/plain".to_string(),
            size_bytes: Some(11),
            storage_ref: Some("legacy.txt".to_string()),
        });
        let extractor = SourceExtractor::new(Arc::new(StaticFetcher(b"legacy body".to_vec())));
        let sources = extractor.extract(&item, &[]).await.unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].text, "legacy body");
        assert_eq!(sources[0].source_locator.as_deref(), Some("legacy.txt"));
    }

    #[tokio::test]
    async fn test_file_rows_take_precedence_over_inline_media() {
        let mut item = test_item("");
        item.media = Some(MediaDescriptor {
            filename: "legacy.txt".to_string(),
            mime_type: "text/plain".to_string(),
            size_bytes: None,
            storage_ref: Some("legacy.txt".to_string()),
        });
        let extractor = SourceExtractor::new(Arc::new(StaticFetcher(b"row body".to_vec())));
        let sources = extractor
            .extract(&item, &[test_file("text/plain")])
            .await
            .unwrap();
        // Only the discrete row was read; the legacy descriptor is ignored.
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].source_locator.as_deref(), Some("photo.png"));
    }

    #[tokio::test]
    async fn test_plain_text_attachment_falls_back_inline() {
        let extractor =
            SourceExtractor::new(Arc::new(StaticFetcher(b"inline body".to_vec())));
        let sources = extractor
            .extract(&test_item(""), &[test_file("text/plain")])
            .await
            .unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].source_type, SourceType::Document);
        assert_eq!(sources[0].text, "inline body");
    }

    #[tokio::test]
    async fn test_parser_failure_fails_extraction() {
        let extractor = SourceExtractor::new(Arc::new(StaticFetcher(vec![0, 1])))
            .with_parser(Arc::new(FailingParser));
        let err = extractor
            .extract(&test_item("body"), &[test_file("application/pdf")])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Extraction(_)));
    }

    #[tokio::test]
    async fn test_inline_attachment_parser_failure_fails_extraction() {
        let mut item = test_item("body");
        item.item_type = ItemType::File;
        item.media = Some(MediaDescriptor {
            filename: "report.pdf".to_string(),
            mime_type: "application/pdf".to_string(),
            size_bytes: Some(2),
            storage_ref: Some("report.pdf".to_string()),
        });
        let extractor = SourceExtractor::new(Arc::new(StaticFetcher(vec![0, 1])))
            .with_parser(Arc::new(FailingParser));
        let err = extractor.extract(&item, &[]).await.unwrap_err();
        assert!(matches!(err, Error::Extraction(_)));
    }

    #[tokio::test]
    async fn test_unsupported_attachment_is_skipped() {
        let extractor = SourceExtractor::new(Arc::new(StaticFetcher(vec![0, 1])));
        let sources = extractor
            .extract(&test_item("body"), &[test_file("application/zip")])
            .await
            .unwrap();
        // The body still indexes.
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].source_type, SourceType::Note);
    }

    #[test]
    fn test_resolve_mime_prefers_stored_type() {
        let media = MediaDescriptor {
            filename: "f".to_string(),
            mime_type: "application/pdf".to_string(),
            size_bytes: None,
            storage_ref: None,
        };
        assert_eq!(resolve_mime(&media, &[]), "application/pdf");
    }

    #[test]
    fn test_resolve_mime_sniffs_when_missing() {
        let media = MediaDescriptor {
            filename: "f".to_string(),
            mime_type: String::new(),
            size_bytes: None,
            storage_ref: None,
        };
        // PNG magic bytes.
        let png = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
        assert_eq!(resolve_mime(&media, &png), "image/png");
    }
}
