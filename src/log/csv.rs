use anyhow::{anyhow, Result};

/// Line ending written after every row, as Python's `csv.writer` does.
pub const ROW_TERMINATOR: &str = "\r\n";

/// Encode one CSV row, `ROW_TERMINATOR`-terminated.
///
/// Fields containing a comma, quote, CR or LF are quoted with inner quotes doubled.
pub fn encode_row(fields: &[&str]) -> String {
    let mut row = String::new();
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            row.push(',');
        }
        if field.contains([',', '"', '\r', '\n']) {
            row.push('"');
            row.push_str(&field.replace('"', "\"\""));
            row.push('"');
        } else {
            row.push_str(field);
        }
    }
    row.push_str(ROW_TERMINATOR);
    row
}

/// Parse CSV text into rows. Quoted fields may span lines.
pub fn parse_rows(text: &str) -> Result<Vec<Vec<String>>> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut row_started = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                other => field.push(other),
            }
            continue;
        }
        match c {
            '"' if field.is_empty() => {
                in_quotes = true;
                row_started = true;
            }
            ',' => {
                row.push(std::mem::take(&mut field));
                row_started = true;
            }
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                if row_started || !field.is_empty() {
                    row.push(std::mem::take(&mut field));
                    rows.push(std::mem::take(&mut row));
                }
                row_started = false;
            }
            other => {
                field.push(other);
                row_started = true;
            }
        }
    }

    if in_quotes {
        return Err(anyhow!("unterminated quoted field"));
    }
    if row_started || !field.is_empty() {
        row.push(field);
        rows.push(row);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_fields_are_not_quoted() {
        assert_eq!(
            encode_row(&["2024-05-01 10:00:00", "max_people", "person=4>3"]),
            "2024-05-01 10:00:00,max_people,person=4>3\r\n"
        );
    }

    #[test]
    fn fields_with_separators_are_quoted() {
        assert_eq!(
            encode_row(&["t", "r1", "missing combo ['person', 'helmet']"]),
            "t,r1,\"missing combo ['person', 'helmet']\"\r\n"
        );
        assert_eq!(encode_row(&["say \"hi\""]), "\"say \"\"hi\"\"\"\r\n");
    }

    #[test]
    fn parses_quoted_and_multiline_fields() -> Result<()> {
        let text = "a,b,c\n1,\"x, y\",\"say \"\"hi\"\"\"\r\n2,\"line\nbreak\",\n";
        let rows = parse_rows(text)?;
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1], vec!["1", "x, y", "say \"hi\""]);
        assert_eq!(rows[2], vec!["2", "line\nbreak", ""]);
        Ok(())
    }

    #[test]
    fn encoded_rows_parse_back() -> Result<()> {
        let fields = ["2024-05-01 10:00:00", "r1", "missing combo ['a', \"b\"]"];
        let rows = parse_rows(&encode_row(&fields))?;
        assert_eq!(rows, vec![fields.iter().map(|f| f.to_string()).collect::<Vec<_>>()]);
        Ok(())
    }

    #[test]
    fn rejects_unterminated_quotes() {
        assert!(parse_rows("a,\"open\n").is_err());
    }
}
