//! Prompt builders for the candidate-fetch and arbitration calls

use chrono::{DateTime, Duration, Utc};

use crate::selector::ShortlistEntry;
use crate::sources::SearchRequest;

/// Build the prompt asking the model to distil one poll from a batch of authors
pub fn fetch_prompt(
    request: &SearchRequest,
    now: DateTime<Utc>,
    include_trending_news: bool,
    rules: Option<&str>,
) -> String {
    let handles = request.handles.join(", ");
    let hours = request.window_seconds as f64 / 3600.0;
    let since = now - Duration::seconds(request.window_seconds as i64);

    let sources = if include_trending_news {
        format!(
            "Combine posts from these handles: {handles}\n\
             with trending topics and viral posts on X in the same window. \
             Only use content from X. Select the SINGLE most poll-worthy topic across all of it."
        )
    } else {
        format!("Target handles: {handles}")
    };

    let avoid = if request.avoid_titles.is_empty() {
        String::new()
    } else {
        let list = request
            .avoid_titles
            .iter()
            .map(|t| format!("- {t}"))
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "\nThese polls were published recently. Do NOT propose the same or a near-duplicate topic:\n{list}\n"
        )
    };

    let hint = if request.topic_hint.trim().is_empty() {
        "none"
    } else {
        request.topic_hint.trim()
    };

    let extra_rules = rules
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(|r| format!("\nAdditional rules:\n{r}\n"))
        .unwrap_or_default();

    format!(
        r#"Current UTC time: {now}. Time window: posts since {since} (~{hours:.2}h).

{sources}
{avoid}
For each handle, collect its posts, replies and reposts in the window and weigh
engagement (likes, reposts, replies, views). Pick at most ONE topic for a binary poll.

Requirements:
- Titles and options must be neutral and balanced; EXACTLY 2 options, each at most 20 words.
- Describe the event in 2-3 sentences of neutral reporting language; do not mention
  handles or engagement numbers in the description.
- Reject only direct incitement to violence, explicit sexual content and privacy leaks.

Optional topic hint: {hint}
{extra_rules}
Output ONLY this JSON, without code fences or commentary:
{{
  "per_handle": [
    {{"handle": "name", "status": "poll_topic_found" | "no_new_posts_in_window" | "no_suitable_topic (reason: ...)", "post_count": 0}}
  ],
  "poll": {{
    "title": "engaging question",
    "description": "neutral 2-3 sentence summary",
    "options": ["Option A", "Option B"],
    "sample_posts": [{{"handle": "name", "summary": "...", "url": "https://x.com/..."}}],
    "why_choose_this_poll": "why this topic beat the others",
    "stats_snapshot": {{"likes": 0, "reposts": 0, "replies": 0, "views": 0}}
  }} | null
}}
If there are no new posts or nothing suitable, "poll" MUST be null."#,
        now = now.format("%Y-%m-%d %H:%M:%S UTC"),
        since = since.to_rfc3339(),
    )
}

/// Build the prompt asking the model to pick one candidate from a shortlist
pub fn arbitration_prompt(shortlist: &[ShortlistEntry]) -> Result<String, serde_json::Error> {
    let candidates = serde_json::to_string_pretty(shortlist)?;
    Ok(format!(
        r#"Several poll candidates were proposed for the same time window. Pick the one most
likely to attract votes: timely, genuinely contested, clearly worded, well supported by engagement.

Candidates:
{candidates}

Reply with ONLY this JSON: {{"winner_index": <index of the chosen candidate>}}"#
    ))
}
