//! Post text plus OCR fragments from attached images.

use tracing::{info, warn};
use wizardlab_adapters::RedditPost;
use wizardlab_ai::ImageOcr;

use crate::redact::redact_secrets;

pub const OCR_SECTION_HEADER: &str = "Image text extracted (for enrichment):";
const FRAGMENT_SEPARATOR: &str = "\n\n---\n\n";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnrichedInput {
    pub text: String,
    pub ocr_fragments: Vec<String>,
}

pub fn compose_enriched_text(base: &str, fragments: &[String]) -> String {
    let base = base.trim();
    if fragments.is_empty() {
        return base.to_string();
    }
    format!(
        "{base}\n\n{OCR_SECTION_HEADER}\n\n{}",
        fragments.join(FRAGMENT_SEPARATOR)
    )
    .trim()
    .to_string()
}

/// Runs OCR over at most `max_images` images; per-image failures are logged and skipped.
pub async fn build_enriched_input(
    post: &RedditPost,
    ocr: Option<&dyn ImageOcr>,
    max_images: usize,
) -> EnrichedInput {
    let base = post.body_text.trim();
    let Some(ocr) = ocr else {
        return EnrichedInput { text: base.to_string(), ocr_fragments: Vec::new() };
    };

    let mut fragments = Vec::new();
    for (index, image_url) in post.images.iter().take(max_images).enumerate() {
        match ocr.extract_text(image_url).await {
            Ok(text) if !text.trim().is_empty() => {
                info!(index, image_url = %image_url, chars = text.len(), "image ocr succeeded");
                fragments.push(text.trim().to_string());
            }
            Ok(_) => info!(index, image_url = %image_url, "image ocr returned no text"),
            Err(err) => warn!(
                index,
                image_url = %image_url,
                error = %redact_secrets(&err.to_string()),
                "image ocr failed"
            ),
        }
    }

    let text = compose_enriched_text(base, &fragments);
    info!(
        post_url = %post.post_url,
        images = post.images.len(),
        fragments = fragments.len(),
        chars = text.len(),
        "ocr enrichment complete"
    );
    EnrichedInput { text, ocr_fragments: fragments }
}
