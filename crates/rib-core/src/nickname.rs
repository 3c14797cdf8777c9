//! Deterministic nickname mutation on collision.

/// Filler cycle used once the nickname has hit the length limit.
const FILLERS: &[char] = &['_', '0', '1', '2', '3', '4', '5', '6', '7', '8', '9'];

/// Next nickname to try after `current` was rejected as in use.
///
/// Appends `_` while there is room; at `max_len` the last character is rotated
/// through a fixed filler cycle instead, so the result is always different
/// from `current` and never longer than `max_len` characters.
pub fn next_nickname(current: &str, max_len: usize) -> String {
    let max_len = max_len.max(2);
    let chars: Vec<char> = current.chars().collect();

    if chars.len() < max_len {
        let mut out = current.to_string();
        out.push(FILLERS[0]);
        return out;
    }

    let mut base: Vec<char> = chars[..max_len - 1].to_vec();
    let last = chars[max_len - 1];
    let replacement = match FILLERS.iter().position(|&c| c == last) {
        Some(i) => FILLERS[(i + 1) % FILLERS.len()],
        None => FILLERS[0],
    };
    base.push(replacement);
    base.into_iter().collect()
}
