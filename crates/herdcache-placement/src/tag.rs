//! Hash tags: pin related keys to the same node.

/// Return the part of `key` used for placement.
///
/// A key of the form `prefix{tag}suffix` is placed by `tag`, so
/// `user:{42}:profile` and `user:{42}:settings` land on the same node. When
/// several braces appear, the tag runs from the last `{` before the final
/// `}` up to that `}`. Keys without a tag are placed by the whole key.
pub fn hash_tag(key: &str) -> &str {
    let Some(close) = key.rfind('}') else {
        return key;
    };
    match key[..close].rfind('{') {
        Some(open) => &key[open + 1..close],
        None => key,
    }
}
