use crate::model::{InteractionKind, TruncationReason};

/// Best guess at why fewer records came back than the post's metrics promise.
/// Informational only.
pub fn shortfall(
    kind: InteractionKind,
    observed: usize,
    expected: Option<u64>,
    own_post: Option<bool>,
    truncation: Option<&TruncationReason>,
) -> Option<String> {
    match truncation {
        Some(TruncationReason::Unauthorized) | Some(TruncationReason::Forbidden) => {
            return Some(match kind {
                InteractionKind::Like => "The likers endpoint requires OAuth 1.0a user context \
                    (API key, API secret, access token and access token secret); bearer tokens are refused"
                    .to_string(),
                _ => format!(
                    "The credentials or API tier do not grant access to the {} endpoint",
                    kind.sheet_name().to_lowercase()
                ),
            })
        }
        Some(TruncationReason::SearchHorizonExceeded) | None => {}
        Some(_) => return None,
    }

    let expected = expected?;
    let observed_u64 = observed as u64;
    if observed_u64 >= expected {
        return None;
    }
    if let Some(TruncationReason::SearchHorizonExceeded) = truncation {
        return Some(format!(
            "Post shows {expected} replies but is older than recent search reaches; \
             only {observed} recent replies could be retrieved"
        ));
    }
    if observed > 0 {
        return Some(format!(
            "Post shows {expected} but {observed} were returned; {} are likely from protected \
             or deleted accounts, hidden by privacy settings, or outside the API tier's visibility",
            expected - observed_u64
        ));
    }
    Some(match (kind, own_post) {
        (InteractionKind::Like, Some(true)) => format!(
            "Your own post shows {expected} likes but none were returned; they may all be from \
             protected accounts, or the data has not propagated yet, so retry in a few minutes"
        ),
        (InteractionKind::Like, _) => format!(
            "Post shows {expected} likes but none were returned; likers of other accounts' posts \
             are often hidden by protected accounts or privacy settings"
        ),
        _ => format!(
            "Post shows {expected} but none were returned; protected accounts, privacy settings \
             or API tier limits can hide them"
        ),
    })
}
