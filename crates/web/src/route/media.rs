//! Content negotiation against `Content-Type` and `Accept`.

use mime::Mime;

/// `*/*` style comparison ignoring parameters.
fn matches(range: &Mime, candidate: &Mime) -> bool {
    let type_matches = range.type_() == mime::STAR || candidate.type_() == mime::STAR || range.type_() == candidate.type_();
    let subtype_matches =
        range.subtype() == mime::STAR || candidate.subtype() == mime::STAR || range.subtype() == candidate.subtype();
    type_matches && subtype_matches
}

/// Whether a request body of `content_type` is accepted by a route consuming `consumes`.
///
/// An empty list accepts everything, as does a request without a content type.
pub fn consumes(consumes: &[Mime], content_type: Option<&str>) -> bool {
    if consumes.is_empty() {
        return true;
    }
    let Some(content_type) = content_type else {
        return true;
    };
    match content_type.parse::<Mime>() {
        Ok(content_type) => consumes.iter().any(|accepted| matches(accepted, &content_type)),
        Err(_invalid) => false,
    }
}

/// Picks the produced type the client prefers, `None` when it accepts none of them.
///
/// A missing `Accept` header accepts the first produced type.
pub fn negotiate(produces: &[Mime], accept: Option<&str>) -> Option<Mime> {
    let Some(accept) = accept else {
        return produces.first().cloned();
    };

    let mut ranges = accept
        .split(',')
        .filter_map(|range| range.trim().parse::<Mime>().ok())
        .map(|range| {
            let quality = range.get_param("q").and_then(|q| q.as_str().parse::<f32>().ok()).unwrap_or(1.0);
            (range, quality)
        })
        .filter(|(_, quality)| *quality > 0.0)
        .collect::<Vec<_>>();
    ranges.sort_by(|(_, a), (_, b)| b.total_cmp(a));

    ranges
        .iter()
        .find_map(|(range, _)| produces.iter().find(|produced| matches(range, produced)))
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mimes(list: &[&str]) -> Vec<Mime> {
        list.iter().map(|m| m.parse().unwrap()).collect()
    }

    #[test]
    fn test_consumes() {
        let json = mimes(&["application/json"]);
        assert!(consumes(&[], Some("text/plain")));
        assert!(consumes(&json, None));
        assert!(consumes(&json, Some("application/json; charset=utf-8")));
        assert!(!consumes(&json, Some("text/plain")));
        assert!(!consumes(&json, Some("not a mime")));
        assert!(consumes(&mimes(&["text/*"]), Some("text/html")));
    }

    #[test]
    fn test_negotiate() {
        let produces = mimes(&["application/json", "text/html"]);
        assert_eq!(negotiate(&produces, None).unwrap(), mime::APPLICATION_JSON);
        assert_eq!(negotiate(&produces, Some("text/html")).unwrap(), mime::TEXT_HTML);
        assert_eq!(negotiate(&produces, Some("*/*")).unwrap(), mime::APPLICATION_JSON);
        assert_eq!(negotiate(&produces, Some("application/json;q=0.5, text/html")).unwrap(), mime::TEXT_HTML);
        assert_eq!(negotiate(&produces, Some("text/*")).unwrap(), mime::TEXT_HTML);
        assert!(negotiate(&produces, Some("image/png")).is_none());
        assert!(negotiate(&produces, Some("text/html;q=0")).is_none());
    }
}
