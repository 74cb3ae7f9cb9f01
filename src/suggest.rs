// ==============================================================================
// "Did You Mean?" Suggestions
// ==============================================================================
//
// Edit-distance helpers used when a name fails to resolve: an undefined type at
// the end of a schema, an unknown field in literal data, an unknown enumerant,
// or an unknown root type.

/// Levenshtein edit distance between two strings, counted in chars.
pub(crate) fn levenshtein(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    // `row[j]` holds the distance between the processed prefix of `a` and the
    // first `j` chars of `b`.
    let mut row: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut diagonal = row[0];
        row[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let substitution = diagonal + usize::from(ca != cb);
            diagonal = row[j + 1];
            row[j + 1] = substitution.min(row[j + 1] + 1).min(row[j] + 1);
        }
    }
    row[b.len()]
}

/// Largest edit distance still worth suggesting: short names tolerate a single
/// typo, longer ones two.
pub(crate) fn max_edit_distance(name_len: usize) -> usize {
    if name_len <= 4 { 1 } else { 2 }
}

/// The candidate closest to `name`, if any lies within the threshold. Ties go
/// to the earliest candidate.
pub(crate) fn closest_match<'a>(
    name: &str,
    candidates: impl IntoIterator<Item = &'a str>,
) -> Option<&'a str> {
    let limit = max_edit_distance(name.chars().count());
    let mut best: Option<(usize, &str)> = None;
    for candidate in candidates {
        if candidate == name {
            continue;
        }
        let distance = levenshtein(name, candidate);
        if distance <= limit && best.is_none_or(|(d, _)| distance < d) {
            best = Some((distance, candidate));
        }
    }
    best.map(|(_, candidate)| candidate)
}

/// Append a "did you mean" hint to `message` when a close candidate exists.
pub(crate) fn with_suggestion<'a>(
    message: String,
    name: &str,
    candidates: impl IntoIterator<Item = &'a str>,
) -> String {
    match closest_match(name, candidates) {
        Some(candidate) => format!("{message} (did you mean `{candidate}`?)"),
        None => message,
    }
}
