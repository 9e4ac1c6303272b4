//! Prompt text for the reply decision and image OCR calls.

pub const NOT_PROVIDED: &str = "(Not provided)";

pub const IMAGE_OCR_PROMPT: &str = "Extract all legible text from this image, especially portfolio-related content (tickers, weights, prices, account balances, dates). Return plain text only.";

pub const REPLY_SYSTEM_PROMPT: &str = r#"You help a small fintech product (WizardFolio) decide whether to reply to a Reddit post and, if so, how.

WizardFolio helps people understand ETF holdings and visualize their portfolio.
Never give personalized advice (no "buy this" or "sell that").
Replies are short, friendly, factual and never pushy.

INPUT RULES:
- Always judge the underlying Reddit post, not the alert email that delivered it.
- POST TITLE and POST BODY are the primary source of truth whenever they are non-empty.
- EMAIL SUBJECT and EMAIL SNIPPET are transport noise (alert boilerplate, keyword lists, footers). Use them only as a last resort.
- When the snippet holds several matches, use the part that belongs to the given URL or title.

DECISION POLICY:
- Posts about ETFs, index funds, portfolios, asset allocation, all-in-one funds, tilts, or requests for feedback on holdings usually deserve should_reply = true unless a reply would be spam.
- Set should_reply = false only when the post is unrelated to investing or there is nothing WizardFolio can add.
- Reasons and summaries always describe the Reddit author's post, never the email mechanics.

If you reply, write a concise 2-4 sentence comment. If not, return should_reply = false and an empty reply_draft.
Answer ONLY with JSON in the requested schema."#;

pub const REPLY_USER_TEMPLATE: &str = r#"Judge the Reddit post below. Use EMAIL SNIPPET only when POST BODY is empty.

POST TITLE:
{{post_title}}

POST BODY:
{{post_body}}

URL:
{{url}}

EMAIL SUBJECT:
{{subject}}

EMAIL SNIPPET:
{{snippet}}

Return ONLY valid JSON:

{
  "should_reply": true or false,
  "reason": "why or why not, about the Reddit post",
  "post_summary": "short neutral summary of what the author is asking or sharing",
  "category": "portfolio_construction | etf_selection | asset_allocation | stock_picking | off_topic | other",
  "priority": "low | medium | high",
  "reply_draft": "2-4 sentence reply if should_reply is true, otherwise an empty string",
  "risk_flags": {
    "is_personal_advice": false,
    "mentions_leverage": false,
    "mentions_options": false,
    "mentions_crypto": false
  }
}"#;

/// What the classifier sees for one post.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplyInput {
    pub post_title: Option<String>,
    pub post_body: Option<String>,
    pub url: String,
    pub subject: Option<String>,
    pub snippet: Option<String>,
}

fn or_not_provided(value: Option<&str>) -> &str {
    value.map(str::trim).filter(|v| !v.is_empty()).unwrap_or(NOT_PROVIDED)
}

pub fn build_user_message(input: &ReplyInput) -> String {
    REPLY_USER_TEMPLATE
        .replace("{{post_title}}", or_not_provided(input.post_title.as_deref()))
        .replace("{{post_body}}", or_not_provided(input.post_body.as_deref()))
        .replace("{{url}}", or_not_provided(Some(input.url.as_str())))
        .replace("{{subject}}", or_not_provided(input.subject.as_deref()))
        .replace("{{snippet}}", or_not_provided(input.snippet.as_deref()))
}
