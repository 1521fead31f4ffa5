use crate::error::IngestError;
use crate::models::UploadedFile;
use crate::traits::{GenerativeModel, PromptPart};
use futures::stream::{self, StreamExt};
use lopdf::Document;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

pub const IMAGE_PROMPT: &str =
    "Extract all text from this image. Return only the raw text without any formatting or analysis.";

#[derive(Debug, Clone)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

pub trait PdfExtractor: Send + Sync {
    fn extract_pages(&self, file: &UploadedFile) -> Result<Vec<PageText>, IngestError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract_pages(&self, file: &UploadedFile) -> Result<Vec<PageText>, IngestError> {
        let document = Document::load_mem(&file.bytes).map_err(|error| IngestError::PdfParse {
            file: file.name.clone(),
            details: error.to_string(),
        })?;

        let mut pages = Vec::new();
        let mut skipped = 0usize;
        for (page_no, _page_id) in document.get_pages() {
            match document.extract_text(&[page_no]) {
                Ok(text) if !text.trim().is_empty() => pages.push(PageText {
                    number: page_no,
                    text,
                }),
                Ok(_) => skipped += 1,
                Err(error) => {
                    debug!(file = %file.name, page = page_no, error = %error, "page text unreadable");
                    skipped += 1;
                }
            }
        }

        if skipped > 0 {
            debug!(file = %file.name, skipped, kept = pages.len(), "skipped pages without text");
        }

        Ok(pages)
    }
}

/// Page texts of one PDF, joined with no separator.
pub fn pdf_text(extractor: &dyn PdfExtractor, file: &UploadedFile) -> Result<String, IngestError> {
    let pages = extractor.extract_pages(file)?;
    Ok(pages.into_iter().map(|page| page.text).collect())
}

/// Runs `extract` over `items` with at most `workers` in flight.
///
/// Results come back in input order. The first error is returned as soon as it
/// arrives and the remaining in-flight work is dropped.
pub async fn extract_ordered<'a, T, O, F, Fut>(
    items: &'a [T],
    workers: usize,
    extract: F,
) -> Result<Vec<O>, IngestError>
where
    F: Fn(&'a T) -> Fut,
    Fut: Future<Output = Result<O, IngestError>>,
{
    let mut slots: Vec<Option<O>> = items.iter().map(|_| None).collect();

    let mut pending = stream::iter(items.iter().enumerate().map(|(position, item)| {
        let work = extract(item);
        async move { (position, work.await) }
    }))
    .buffer_unordered(workers.max(1));

    while let Some((position, result)) = pending.next().await {
        slots[position] = Some(result?);
    }

    Ok(slots.into_iter().flatten().collect())
}

pub async fn extract_pdf_texts(
    extractor: Arc<dyn PdfExtractor>,
    files: &[UploadedFile],
    workers: usize,
) -> Result<String, IngestError> {
    let texts = extract_ordered(files, workers, |file| {
        let extractor = Arc::clone(&extractor);
        let file = file.clone();
        async move {
            tokio::task::spawn_blocking(move || pdf_text(extractor.as_ref(), &file))
                .await
                .map_err(|error| IngestError::Task(error.to_string()))?
        }
    })
    .await?;

    Ok(texts.concat())
}

/// Reads text out of images with a multimodal model.
pub struct ImageExtractor {
    model: Arc<dyn GenerativeModel>,
}

impl ImageExtractor {
    pub fn new(model: Arc<dyn GenerativeModel>) -> Self {
        Self { model }
    }

    pub async fn extract(&self, file: &UploadedFile) -> Result<String, IngestError> {
        let parts = [
            PromptPart::text(IMAGE_PROMPT),
            PromptPart::InlineData {
                mime_type: file.mime_type.clone(),
                data: file.bytes.clone(),
            },
        ];

        let mut text = self
            .model
            .generate(&parts)
            .await
            .map_err(|source| IngestError::ImageExtraction {
                file: file.name.clone(),
                source,
            })?;
        text.push('\n');
        Ok(text)
    }

    pub async fn extract_all(
        &self,
        files: &[UploadedFile],
        workers: usize,
    ) -> Result<String, IngestError> {
        let texts = extract_ordered(files, workers, |file| self.extract(file)).await?;
        Ok(texts.concat())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::ModelError;
    use crate::models::PDF_MIME;
    use async_trait::async_trait;
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Object, Stream};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    pub(crate) fn pdf_with_pages(pages: &[&str]) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! {
                "F1" => font_id,
            },
        });

        let mut kids: Vec<Object> = Vec::new();
        for text in pages {
            let operations = if text.is_empty() {
                Vec::new()
            } else {
                vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 24.into()]),
                    Operation::new("Td", vec![72.into(), 700.into()]),
                    Operation::new("Tj", vec![Object::string_literal(*text)]),
                    Operation::new("ET", vec![]),
                ]
            };
            let content = Content { operations };
            let content_id = doc.add_object(Stream::new(
                dictionary! {},
                content.encode().expect("content encodes"),
            ));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(page_id.into());
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).expect("in-memory save");
        bytes
    }

    struct EchoModel;

    #[async_trait]
    impl GenerativeModel for EchoModel {
        fn model_name(&self) -> &str {
            "echo"
        }

        async fn generate(&self, parts: &[PromptPart]) -> Result<String, ModelError> {
            match parts {
                [PromptPart::Text(prompt), PromptPart::InlineData { data, .. }] => {
                    assert_eq!(prompt, IMAGE_PROMPT);
                    let delay = data.first().copied().unwrap_or(0) as u64;
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    Ok(String::from_utf8_lossy(&data[1..]).to_string())
                }
                _ => Err(ModelError::EmptyResponse("unexpected prompt shape".to_string())),
            }
        }
    }

    fn image(name: &str, delay_ms: u8, text: &str) -> UploadedFile {
        let mut bytes = vec![delay_ms];
        bytes.extend_from_slice(text.as_bytes());
        UploadedFile::new(name, "image/png", bytes)
    }

    #[test]
    fn lopdf_extractor_skips_pages_without_text() {
        let file = UploadedFile::new("notes.pdf", PDF_MIME, pdf_with_pages(&["Alpha", "", "Gamma"]));
        let pages = LopdfExtractor
            .extract_pages(&file)
            .expect("generated pdf parses");

        assert_eq!(pages.iter().map(|page| page.number).collect::<Vec<_>>(), vec![1, 3]);
        assert!(pages[0].text.contains("Alpha"));
        assert!(pages[1].text.contains("Gamma"));

        let text = pdf_text(&LopdfExtractor, &file).expect("generated pdf parses");
        let alpha = text.find("Alpha").expect("first page kept");
        let gamma = text.find("Gamma").expect("last page kept");
        assert!(alpha < gamma);
    }

    #[test]
    fn lopdf_extractor_skips_whitespace_only_pages() {
        let file = UploadedFile::new("blank.pdf", PDF_MIME, pdf_with_pages(&["Alpha", "   ", "Gamma"]));
        let pages = LopdfExtractor
            .extract_pages(&file)
            .expect("generated pdf parses");

        assert_eq!(pages.iter().map(|page| page.number).collect::<Vec<_>>(), vec![1, 3]);
    }

    #[test]
    fn lopdf_extractor_reports_broken_pdf() {
        let file = UploadedFile::new("broken.pdf", PDF_MIME, b"%PDF-1.4\n%broken".to_vec());
        let result = LopdfExtractor.extract_pages(&file);
        assert!(matches!(result, Err(IngestError::PdfParse { file, .. }) if file == "broken.pdf"));
    }

    #[tokio::test]
    async fn ordered_extraction_keeps_input_order() {
        let delays = [60u64, 5, 30, 0];
        let in_flight = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);

        let results = extract_ordered(&delays, 2, |delay| {
            let in_flight = &in_flight;
            let peak = &peak;
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(*delay)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, IngestError>(format!("file-{delay}"))
            }
        })
        .await
        .expect("no failures");

        assert_eq!(results, vec!["file-60", "file-5", "file-30", "file-0"]);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn first_failure_aborts_the_batch() {
        let items = [2_000u64, 0, 2_000];
        let started = std::time::Instant::now();

        let result = extract_ordered(&items, 3, |delay| async move {
            if *delay == 0 {
                return Err(IngestError::InvalidArgument("bad file".to_string()));
            }
            tokio::time::sleep(Duration::from_millis(*delay)).await;
            Ok(String::new())
        })
        .await;

        assert!(matches!(result, Err(IngestError::InvalidArgument(_))));
        assert!(started.elapsed() < Duration::from_millis(1_000));
    }

    #[tokio::test]
    async fn pdf_batch_concatenates_in_upload_order() {
        let files = vec![
            UploadedFile::new("a.pdf", PDF_MIME, pdf_with_pages(&["First"])),
            UploadedFile::new("b.pdf", PDF_MIME, pdf_with_pages(&["Second"])),
        ];

        let text = extract_pdf_texts(Arc::new(LopdfExtractor), &files, 2)
            .await
            .expect("both pdfs parse");

        let first = text.find("First").expect("first file present");
        let second = text.find("Second").expect("second file present");
        assert!(first < second);
    }

    #[tokio::test]
    async fn one_broken_pdf_fails_the_batch() {
        let files = vec![
            UploadedFile::new("a.pdf", PDF_MIME, pdf_with_pages(&["First"])),
            UploadedFile::new("b.pdf", PDF_MIME, b"not a pdf".to_vec()),
        ];

        let result = extract_pdf_texts(Arc::new(LopdfExtractor), &files, 2).await;
        assert!(matches!(result, Err(IngestError::PdfParse { .. })));
    }

    #[tokio::test]
    async fn image_texts_end_with_newline_in_upload_order() {
        let extractor = ImageExtractor::new(Arc::new(EchoModel));
        let files = vec![
            image("slow.png", 50, "slow text"),
            image("fast.png", 0, "fast text"),
        ];

        let text = extractor
            .extract_all(&files, 4)
            .await
            .expect("echo model never fails");
        assert_eq!(text, "slow text\nfast text\n");
    }
}
