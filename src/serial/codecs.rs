/// Frames ending in a literal byte sequence.
pub(crate) mod delimiter;
