//! 文本分块器
//!
//! 将规范化后的长文本按句切分，并把相邻句子合并为不超过 `max_chars` 的片段

use super::narration::TextChunk;

/// 默认片段最大字符数
pub const DEFAULT_MAX_CHUNK_CHARS: usize = 1500;

/// 检查是否为句末标点
#[inline]
fn is_sentence_terminal(ch: char) -> bool {
    matches!(ch, '.' | '!' | '?')
}

/// 规范化文本：所有连续空白折叠为单个空格，并去除首尾空白
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// 按句切分（输入必须已规范化）
///
/// 句子边界为一串句末标点（如 `...`、`?!`）且其后紧跟空格或文本结束。
/// 标点后直接跟非空白字符时（如 `3.14`）不视为边界。
fn split_sentences(normalized: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = normalized.char_indices().peekable();

    while let Some((pos, ch)) = chars.next() {
        if !is_sentence_terminal(ch) {
            continue;
        }
        match chars.peek() {
            Some((_, next)) if is_sentence_terminal(*next) => continue,
            Some((next_pos, ' ')) => {
                sentences.push(&normalized[start..*next_pos]);
                start = next_pos + 1;
            }
            None => {
                sentences.push(&normalized[start..pos + ch.len_utf8()]);
                start = normalized.len();
            }
            Some(_) => {}
        }
    }

    if start < normalized.len() {
        sentences.push(&normalized[start..]);
    }

    sentences
}

/// 对文本分块
///
/// 分块策略：
/// 1. 规范化空白
/// 2. 按句末标点切句，保留标点
/// 3. 顺序累积句子，追加下一句会超过 `max_chars` 时输出当前缓冲
/// 4. 单句本身超过 `max_chars` 时原样作为一个超长片段输出，不截断
///
/// 所有片段以单个空格连接后等于 `normalize_text(text)`
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<TextChunk> {
    let normalized = normalize_text(text);
    let mut chunks: Vec<TextChunk> = Vec::new();
    let mut buffer = String::new();
    let mut buffer_chars = 0;

    for sentence in split_sentences(&normalized) {
        let sentence_chars = sentence.chars().count();

        if !buffer.is_empty() && buffer_chars + 1 + sentence_chars > max_chars {
            chunks.push(TextChunk::new(chunks.len(), std::mem::take(&mut buffer)));
            buffer_chars = 0;
        }

        if !buffer.is_empty() {
            buffer.push(' ');
            buffer_chars += 1;
        }
        buffer.push_str(sentence);
        buffer_chars += sentence_chars;
    }

    if !buffer.is_empty() {
        chunks.push(TextChunk::new(chunks.len(), buffer));
    }

    chunks
}
