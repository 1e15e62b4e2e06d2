use tp_core::head_tail::{omission_marker, truncate_to_token_budget, HeadTailBuffer};

fn numbered(n: usize) -> String {
    (1..=n)
        .map(|i| format!("Line {i}"))
        .collect::<Vec<_>>()
        .join("\n")
}

// ===========================================================================
// Head/tail rendering
// ===========================================================================

#[test]
fn hundred_lines_into_twenty() {
    let text = numbered(100);
    let buf = HeadTailBuffer::build(&text, 20);

    assert!(buf.truncated);
    assert_eq!(buf.total_lines, 100);
    assert_eq!(buf.head_lines, 10);
    assert_eq!(buf.tail_lines, 10);
    assert_eq!(buf.omitted_lines(), 80);

    let rendered: Vec<&str> = buf.text.lines().collect();
    assert_eq!(rendered.len(), 21);
    for (i, line) in rendered[..10].iter().enumerate() {
        assert_eq!(*line, format!("Line {}", i + 1));
    }
    assert_eq!(rendered[10], omission_marker(80));
    for (i, line) in rendered[11..].iter().enumerate() {
        assert_eq!(*line, format!("Line {}", i + 91));
    }
}

#[test]
fn fitting_text_is_returned_verbatim_for_every_budget() {
    for n in 0..30 {
        let text = numbered(n);
        for max in n..n + 3 {
            let buf = HeadTailBuffer::build(&text, max);
            assert!(!buf.truncated, "n={n} max={max}");
            assert_eq!(buf.text, text, "n={n} max={max}");
        }
    }
}

#[test]
fn head_and_tail_match_input_for_every_budget() {
    let total = 40;
    let text = numbered(total);
    let input: Vec<&str> = text.lines().collect();

    for max in 0..total {
        let buf = HeadTailBuffer::build(&text, max);
        let head = max / 2;
        let tail = max - head;

        assert!(buf.truncated, "max={max}");
        assert!(buf.head_lines + buf.tail_lines <= max);
        assert_eq!(buf.omitted_lines(), total - max, "max={max}");

        let rendered: Vec<&str> = buf.text.lines().collect();
        assert_eq!(&rendered[..head], &input[..head], "head for max={max}");
        assert_eq!(rendered[head], omission_marker(total - max));
        assert_eq!(&rendered[head + 1..], &input[total - tail..], "tail for max={max}");
    }
}

#[test]
fn growing_output_can_be_rebuilt_repeatedly() {
    let mut text = String::new();
    let mut last_total = 0;
    for i in 1..=50 {
        text.push_str(&format!("tick {i}\n"));
        let buf = HeadTailBuffer::build(&text, 10);
        assert!(buf.total_lines > last_total);
        last_total = buf.total_lines;
        assert_eq!(buf.truncated, i > 10);
    }
    let buf = HeadTailBuffer::build(&text, 10);
    assert!(buf.text.starts_with("tick 1\n"));
    assert!(buf.text.ends_with("tick 50\n"));
}

// ===========================================================================
// Token budget
// ===========================================================================

#[test]
fn token_cap_then_line_cap() {
    let text: String = (0..500).map(|i| format!("row {i:04} {}\n", "x".repeat(30))).collect();
    let capped = truncate_to_token_budget(&text, 200);
    assert!(capped.truncated());
    assert!(capped.text.len() < text.len());

    let buf = HeadTailBuffer::build(&capped.text, 8);
    assert!(buf.truncated);
    assert!(buf.text.starts_with("row 0000"));
    assert!(buf.text.trim_end().ends_with(&"x".repeat(30)));
}
