//! Chat message formatting
//!
//! Pure functions from pipeline data to Telegram HTML. All user-supplied text
//! is escaped.

use chrono::{DateTime, Utc};

use crate::models::{PerAuthorStatus, PollCandidate, PublishResult, SocialStatus, StatsSnapshot};
use crate::utils::escape_html;

const SEPARATOR: &str = "━━━━━━━━━━━━━━━━━━━━";
const MAX_SAMPLE_POSTS: usize = 3;

fn header(now: DateTime<Utc>) -> Vec<String> {
    vec![
        "🗳️ <b>Poll Agent Update</b>".to_string(),
        format!("⏰ {}", now.format("%Y-%m-%d %H:%M UTC")),
        format!("{SEPARATOR}\n"),
    ]
}

fn count(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value:.1}")
    }
}

fn engagement(stats: &StatsSnapshot) -> String {
    format!(
        "📊 <b>Engagement</b>: ❤️{} 🔁{} 💬{} 👁️{}",
        count(stats.likes),
        count(stats.reposts),
        count(stats.replies),
        count(stats.views)
    )
}

fn chain_line(result: &PublishResult) -> String {
    let chain = &result.chain_outcome;
    if chain.success {
        return match &chain.contract_address {
            Some(address) => format!("⛓️ <b>Chain</b>: ✅ {}", escape_html(address)),
            None => "⛓️ <b>Chain</b>: ✅ created (no contract address returned)".to_string(),
        };
    }

    let error = chain.error.as_deref().unwrap_or("unknown error");
    let mut line = format!("⛓️ <b>Chain</b>: ❌ chain publish failed: {}", escape_html(error));
    if chain.maybe_success {
        line.push_str("\n   ⚠️ request timed out; the poll may exist on chain, check before republishing");
    }
    line
}

fn social_line(result: &PublishResult) -> String {
    let social = &result.social_outcome;
    match social.status {
        SocialStatus::Ok => format!("🐦 <b>X</b>: ✅ {}", escape_html(&result.tweet_url)),
        SocialStatus::Failed => format!(
            "🐦 <b>X</b>: ❌ {}",
            escape_html(social.error.as_deref().unwrap_or("post failed"))
        ),
        SocialStatus::Skipped => format!(
            "🐦 <b>X</b>: ⏭️ skipped ({})",
            escape_html(social.error.as_deref().unwrap_or("no vote link"))
        ),
    }
}

fn candidate_section(
    candidate: &PollCandidate,
    result: &PublishResult,
    per_handle: &[PerAuthorStatus],
) -> Vec<String> {
    let mut lines = Vec::new();

    if let Some(tag) = &candidate.tag {
        lines.push(format!("🏷️ <b>{}</b>", escape_html(tag)));
    }
    lines.push(format!(
        "❓<b>Poll title</b>\n<b>{}</b>\n",
        escape_html(&candidate.title)
    ));
    lines.push(format!(
        "📝 <b>Description</b>\n{}\n",
        escape_html(&candidate.description)
    ));

    if !candidate.options.is_empty() {
        lines.push("📊 <b>Poll Options</b>".to_string());
        for (i, option) in candidate.options.iter().enumerate() {
            lines.push(format!("   {}️⃣ {}", i + 1, escape_html(option)));
        }
        lines.push(String::new());
    }

    let posts: Vec<_> = candidate
        .sample_posts
        .iter()
        .filter(|p| !p.url.is_empty())
        .take(MAX_SAMPLE_POSTS)
        .collect();
    if !posts.is_empty() {
        lines.push("🔗 <b>Related Posts</b>".to_string());
        for post in posts {
            lines.push(format!(
                "   • @{}: {}",
                escape_html(&post.handle),
                escape_html(&post.summary)
            ));
            lines.push(format!("     {}", escape_html(&post.url)));
        }
        lines.push(String::new());
    }

    if !candidate.rationale.is_empty() {
        lines.push(format!(
            "🎯 <b>Why Choose This Poll</b>\n{}\n",
            escape_html(&candidate.rationale)
        ));
    }

    let source_handle = per_handle.iter().find(|s| {
        s.status.is_found()
            && s.source_group.map_or(true, |g| g == candidate.source_group)
            && s.batch_index == candidate.batch_index
    });
    if let Some(status) = source_handle {
        lines.push(format!(
            "📍 <b>Source Handle</b>: @{}",
            escape_html(&status.handle)
        ));
    }
    lines.push(engagement(&candidate.stats_snapshot));
    lines.push(String::new());

    lines.push(chain_line(result));
    if !result.vote_url.is_empty() {
        lines.push(format!("🗳️ <b>Vote</b>: {}", escape_html(&result.vote_url)));
    }
    lines.push(social_line(result));
    lines
}

/// Verbose operational message covering every published candidate
pub fn format_group_message(
    published: &[(PollCandidate, PublishResult)],
    per_handle: &[PerAuthorStatus],
    now: DateTime<Utc>,
) -> String {
    let mut lines = header(now);
    for (i, (candidate, result)) in published.iter().enumerate() {
        if i > 0 {
            lines.push(format!("\n{SEPARATOR}\n"));
        }
        lines.extend(candidate_section(candidate, result, per_handle));
    }
    lines.push(format!("\n{SEPARATOR}"));
    lines.join("\n")
}

/// Terse public announcement; `None` when no result has a vote link
pub fn format_channel_message(published: &[(PollCandidate, PublishResult)]) -> Option<String> {
    let sections: Vec<String> = published
        .iter()
        .filter(|(_, result)| !result.vote_url.is_empty())
        .map(|(candidate, result)| {
            let mut lines = vec![
                "🗳️ <b>New Poll</b>".to_string(),
                String::new(),
                format!("<b>{}</b>", escape_html(&candidate.title)),
                String::new(),
            ];
            for (i, option) in candidate.options.iter().enumerate() {
                lines.push(format!("{}️⃣ {}", i + 1, escape_html(option)));
            }
            lines.push(String::new());
            lines.push(format!("🔥 Vote now: {}", escape_html(&result.vote_url)));
            lines.join("\n")
        })
        .collect();

    if sections.is_empty() {
        None
    } else {
        Some(sections.join("\n\n"))
    }
}

/// Liveness message sent when no candidate was found
pub fn format_heartbeat(
    per_handle: &[PerAuthorStatus],
    explain: Option<&str>,
    now: DateTime<Utc>,
) -> String {
    let mut lines = header(now);
    lines.push(format!(
        "ℹ️ <b>Status</b>\n{}\n",
        escape_html(explain.unwrap_or("No suitable poll topic"))
    ));

    if !per_handle.is_empty() {
        lines.push("📊 <b>Handle Status</b>".to_string());
        for status in per_handle {
            lines.push(format!(
                "   • @{}: {}",
                escape_html(&status.handle),
                escape_html(&status.status.as_wire())
            ));
        }
    }

    lines.push(format!("\n{SEPARATOR}"));
    lines.join("\n")
}
