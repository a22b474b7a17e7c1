//! Packing text into message-sized blocks.

/// Splits `line` into pieces of at most `max_chars` characters.
fn split_long_line(line: &str, max_chars: usize) -> Vec<String> {
    if max_chars == 0 || line.chars().count() <= max_chars {
        return vec![line.to_string()];
    }
    let chars: Vec<char> = line.chars().collect();
    chars
        .chunks(max_chars)
        .map(|piece| piece.iter().collect())
        .collect()
}

/// Greedily packs lines into blocks of at most `max_chars` characters joined
/// by newlines. Order and content are preserved; over-long lines are split.
pub fn chunk_lines<I, S>(lines: I, max_chars: usize) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut blocks = Vec::new();
    let mut buf = String::new();
    let mut buf_len = 0usize;

    for line in lines {
        for piece in split_long_line(line.as_ref(), max_chars) {
            let piece_len = piece.chars().count();
            let need = piece_len + usize::from(!buf.is_empty());

            if !buf.is_empty() && buf_len + need > max_chars {
                blocks.push(std::mem::take(&mut buf));
                buf_len = 0;
            }
            if !buf.is_empty() {
                buf.push('\n');
                buf_len += 1;
            }
            buf.push_str(&piece);
            buf_len += piece_len;
        }
    }

    if !buf.is_empty() {
        blocks.push(buf);
    }
    blocks
}

pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    chunk_lines(text.lines(), max_chars)
}
