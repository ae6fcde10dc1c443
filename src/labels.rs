//! # Hiragana Label Table
//!
//! Maps classifier output indices to displayable hiragana symbols. The table
//! covers the 73 monograph / voiced / semi-voiced kana plus the 33 yōon
//! digraphs, in the order the classifier was trained with.
//!
//! The table is index-addressed and immutable. Its length is independent of
//! the classifier's output width: ranking drops any output index that falls
//! beyond the table bound instead of erroring.

/// Ordered label table. Output-vector position `i` corresponds to
/// `CLASS_LABELS[i]`.
pub const CLASS_LABELS: &[&str] = &[
    "あ", "い", "う", "え", "お",
    "か", "き", "く", "け", "こ",
    "が", "ぎ", "ぐ", "げ", "ご",
    "さ", "し", "す", "せ", "そ",
    "ざ", "じ", "ず", "ぜ", "ぞ",
    "た", "ち", "つ", "て", "と",
    "だ", "ぢ", "づ", "で", "ど",
    "な", "に", "ぬ", "ね", "の",
    "は", "ひ", "ふ", "へ", "ほ",
    "ば", "び", "ぶ", "べ", "ぼ",
    "ぱ", "ぴ", "ぷ", "ぺ", "ぽ",
    "ま", "み", "む", "め", "も",
    "や", "ゆ", "よ",
    "ら", "り", "る", "れ", "ろ",
    "わ", "ゐ", "ゑ", "を", "ん",
    "しゃ", "しゅ", "しょ",
    "ちゃ", "ちゅ", "ちょ",
    "じゃ", "じゅ", "じょ",
    "きゃ", "きゅ", "きょ",
    "ぎゃ", "ぎゅ", "ぎょ",
    "にゃ", "にゅ", "にょ",
    "ひゃ", "ひゅ", "ひょ",
    "びゃ", "びゅ", "びょ",
    "ぴゃ", "ぴゅ", "ぴょ",
    "みゃ", "みゅ", "みょ",
    "りゃ", "りゅ", "りょ",
];
