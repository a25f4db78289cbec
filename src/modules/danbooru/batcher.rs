//! Splits post urls into discord sized messages.

/// Discord's message length limit
pub(crate) const MAX_MESSAGE_CHARS: usize = 2000;
/// Posts per message when delivering into a shared channel
pub(crate) const SHARED_CHUNK_ITEMS: usize = 4;

/// Header put in front of delivered posts, mentions on the first line and the
/// label in a code span on the second.
pub(crate) fn header(mentions: &str, label: &str) -> String {
    format!("{}\n`{}`\n", mentions, label)
}

/// Splits `lines` into messages.
///
/// With `max_items` every message holds at most that many lines and repeats
/// `header`, a message is closed early only if the next line would push it
/// over `max_chars`. Without it lines are packed greedily into as few
/// messages as `max_chars` allows and `header` only leads the first one.
///
/// A header that doesn't fit in front of the line it leads is sent as
/// separate messages of its own, split between mentions. Every line ends up
/// in exactly one message, in input order, and no message is longer than
/// `max_chars` unless a single line already is.
pub(crate) fn batch<S: AsRef<str>>(
    lines: &[S],
    header: &str,
    max_chars: usize,
    max_items: Option<usize>,
) -> Vec<String> {
    let mut messages = Vec::new();
    if lines.is_empty() {
        return messages;
    }

    let repeat_header = max_items.is_some();
    let max_items = max_items.unwrap_or(usize::MAX).max(1);

    let mut current = String::new();
    let mut items = 0;
    let mut header_due = !header.is_empty();

    for line in lines {
        let line = line.as_ref();
        let full = items >= max_items;
        let too_long = items > 0 && current.len() + line.len() + 1 > max_chars;

        if full || too_long {
            messages.push(std::mem::take(&mut current));
            header_due = repeat_header && !header.is_empty();
            items = 0;
        }

        if header_due {
            if header.len() + line.len() + 1 <= max_chars {
                current.push_str(header);
            } else {
                messages.extend(split_text(header, max_chars));
            }
            header_due = false;
        }

        current.push_str(line);
        current.push('\n');
        items += 1;
    }

    messages.push(current);
    messages
}

/// Packs `text` into pieces of at most `max_chars`, breaking after commas and
/// newlines where possible.
fn split_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(4);
    let mut pieces = Vec::new();
    let mut current = String::new();

    for token in text.split_inclusive(|c: char| c == ',' || c == '\n') {
        let mut token = token;
        while !token.is_empty() {
            let mut at = token.len().min(max_chars);
            while !token.is_char_boundary(at) {
                at -= 1;
            }
            let (part, rest) = token.split_at(at);
            token = rest;

            if !current.is_empty() && current.len() + part.len() > max_chars {
                pieces.push(std::mem::take(&mut current));
            }
            current.push_str(part);
        }
    }

    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    fn urls(n: usize) -> Vec<String> {
        (0..n)
            .map(|i| format!("https://cdn.donmai.us/original/{:04}.jpg", i))
            .collect()
    }

    fn strip<'a>(messages: &'a [String], header: &str) -> Vec<&'a str> {
        messages
            .iter()
            .enumerate()
            .flat_map(|(i, m)| {
                let body = if i == 0 || m.starts_with(header) {
                    m.strip_prefix(header).unwrap_or(m)
                } else {
                    m.as_str()
                };
                body.lines()
            })
            .collect()
    }

    #[test]
    fn nothing_to_send() {
        assert!(batch::<String>(&[], "head\n", MAX_MESSAGE_CHARS, None).is_empty());
        assert!(batch::<String>(&[], "head\n", MAX_MESSAGE_CHARS, Some(4)).is_empty());
    }

    #[test]
    fn shared_chunks_of_four_with_header() {
        let posts = urls(10);
        let head = header("<@1>,<@2>", "touhou");
        let messages = batch(&posts, &head, MAX_MESSAGE_CHARS, Some(SHARED_CHUNK_ITEMS));

        assert_eq!(messages.len(), 3);
        for message in &messages {
            assert!(message.starts_with(&head));
        }
        let counts: Vec<usize> = messages
            .iter()
            .map(|m| m.strip_prefix(&head).unwrap().lines().count())
            .collect();
        assert_eq!(counts, vec![4, 4, 2]);
        assert_eq!(strip(&messages, &head), posts);
    }

    #[test]
    fn shared_exact_multiple_has_no_empty_chunk() {
        let posts = urls(8);
        let messages = batch(&posts, "h\n", MAX_MESSAGE_CHARS, Some(SHARED_CHUNK_ITEMS));

        assert_eq!(messages.len(), 2);
        assert!(messages.iter().all(|m| m.lines().count() == 5));
    }

    #[test]
    fn private_packs_until_char_budget() {
        let posts = urls(200);
        let head = header("<@1>", "touhou");
        let messages = batch(&posts, &head, MAX_MESSAGE_CHARS, None);

        assert!(messages.len() > 1);
        assert!(messages[0].starts_with(&head));
        assert!(messages[1..].iter().all(|m| !m.starts_with(&head)));
        assert!(messages.iter().all(|m| m.len() <= MAX_MESSAGE_CHARS));
        // greedy, the next line wouldn't have fit
        for pair in messages.windows(2) {
            let next_line = pair[1].lines().next().unwrap();
            assert!(pair[0].len() + next_line.len() + 1 > MAX_MESSAGE_CHARS);
        }
        assert_eq!(strip(&messages, &head), posts);
    }

    #[test]
    fn private_small_batch_is_one_message() {
        let posts = urls(3);
        let messages = batch(&posts, "h\n", MAX_MESSAGE_CHARS, None);

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0], format!("h\n{}\n{}\n{}\n", posts[0], posts[1], posts[2]));
    }

    #[test]
    fn shared_respects_char_budget_with_huge_header() {
        let posts = urls(4);
        let head = format!("{}\n", "x".repeat(1900));
        let messages = batch(&posts, &head, MAX_MESSAGE_CHARS, Some(SHARED_CHUNK_ITEMS));

        assert!(messages.len() > 1);
        assert!(messages.iter().all(|m| m.len() <= MAX_MESSAGE_CHARS));
        assert_eq!(strip(&messages, &head), posts);
    }

    #[test]
    fn oversized_header_is_sent_on_its_own() {
        let mentions = (0..90)
            .map(|i| format!("<@{}>", 100_000_000_000_000_000u64 + i))
            .collect::<Vec<String>>()
            .join(",");
        let head = header(&mentions, "touhou");
        assert!(head.len() + 40 > MAX_MESSAGE_CHARS);

        for max_items in [Some(SHARED_CHUNK_ITEMS), None] {
            let posts = urls(6);
            let messages = batch(&posts, &head, MAX_MESSAGE_CHARS, max_items);

            assert!(messages.iter().all(|m| m.len() <= MAX_MESSAGE_CHARS));
            assert_eq!(messages.concat().matches("<@").count() % 90, 0);
            let delivered: Vec<&str> = messages
                .iter()
                .flat_map(|m| m.lines())
                .filter(|l| l.starts_with("https://"))
                .collect();
            assert_eq!(delivered, posts);
        }

        // shared chunks each get the full header in front
        let messages = batch(&urls(6), &head, MAX_MESSAGE_CHARS, Some(SHARED_CHUNK_ITEMS));
        assert_eq!(messages.concat().matches("<@").count(), 180);
        assert_eq!(messages.concat().matches("`touhou`").count(), 2);
    }

    #[test]
    fn header_pieces_break_between_mentions() {
        let pieces = split_text("<@1>,<@2>,<@3>\n`label`\n", 10);

        assert_eq!(pieces, vec!["<@1>,<@2>,", "<@3>\n", "`label`\n"]);
        assert_eq!(pieces.concat(), "<@1>,<@2>,<@3>\n`label`\n");

        let long = "x".repeat(25);
        let pieces = split_text(&long, 10);
        assert_eq!(pieces.iter().map(String::len).collect::<Vec<_>>(), vec![10, 10, 5]);
    }
}
