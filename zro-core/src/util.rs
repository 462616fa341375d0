//! Contains a collection of useful utility functions.

extern crate strsim;

/// Get a similar name based on string similarity.
pub fn get_similar(original: &str, candidates: &[&str]) -> Option<String> {
    use self::strsim::normalized_damerau_levenshtein;
    let mut highest_sim = 0f64;
    let mut best = None;
    for candidate in candidates {
        let sim = normalized_damerau_levenshtein(candidate, original);
        if sim > highest_sim {
            highest_sim = sim;
            best = Some(*candidate);
        }
    }
    if highest_sim > 0.4f64 {
        best.map(|s| s.to_owned())
    } else {
        None
    }
}

/// Formats a "did you mean" hint for an unknown name, if any candidate is
/// close enough.
pub fn suggestion(original: &str, candidates: &[&str]) -> Option<String> {
    get_similar(original, candidates).map(|s| format!("did you mean `{}`?", s))
}

#[test]
fn similar_names() {
    let names = ["exposure", "gain", "start_acquisition"];
    assert_eq!(get_similar("exposur", &names), Some("exposure".to_string()));
    assert_eq!(get_similar("zzzzzzzzzz", &names), None);
    assert_eq!(get_similar("anything", &[]), None);
}
