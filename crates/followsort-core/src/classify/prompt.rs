use crate::{
    domain::{Category, FollowedEntity},
    ports::ClassifierPrompt,
};

const SYSTEM_PROMPT: &str = "You are a content classification expert. You sort Bilibili \
creators into topical categories using only their display name, signature and \
verification title.";

const MAX_BIO_CHARS: usize = 200;

/// Build the prompt for one batch. `Unknown` is deliberately not offered.
pub fn build_prompt(batch: &[&FollowedEntity]) -> ClassifierPrompt {
    let labels = Category::TOPICAL
        .iter()
        .map(|c| c.label())
        .collect::<Vec<_>>()
        .join(", ");

    let mut creators = String::new();
    for (idx, entity) in batch.iter().enumerate() {
        creators.push_str(&format!("[{}]\nname: {}\n", idx + 1, entity.name));
        let bio = one_line(&entity.signature);
        if !bio.is_empty() {
            creators.push_str(&format!("bio: {bio}\n"));
        }
        if entity.verification.is_verified() {
            creators.push_str(&format!(
                "verified: {}\n",
                one_line(&entity.verification.description)
            ));
        }
    }

    let user = format!(
        r#"Classify each Bilibili creator below into exactly one category.

Allowed categories (copy the label verbatim): {labels}

Rules:
1. Judge by the name, bio and verification title only.
2. Prefer explicit keywords and clear domain signals.
3. Pick the single most fitting category for each creator.
4. When the information is thin, still pick the closest category and report a low confidence.
5. Keep the reason short.

Creators:
{creators}
Reply with a single JSON object and nothing else:
{{"results": [{{"name": "<name exactly as given>", "category": "<label>", "confidence": 0.8, "reason": "<short reason>"}}]}}

confidence is a number between 0 and 1."#
    );

    ClassifierPrompt {
        system: SYSTEM_PROMPT.to_string(),
        user,
    }
}

fn one_line(s: &str) -> String {
    let flat = s.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() > MAX_BIO_CHARS {
        format!("{}...", flat.chars().take(MAX_BIO_CHARS).collect::<String>())
    } else {
        flat
    }
}
