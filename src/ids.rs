use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdRangeError {
    #[error("no ids given")]
    Empty,

    #[error("'{0}' is not a valid id")]
    InvalidNumber(String),

    #[error("range {start}-{end} runs backwards")]
    Reversed { start: u16, end: u16 },
}

/// Parses a selection such as `"100, 105-110"` into sorted, unique ids.
pub fn parse_ids(input: &str) -> Result<Vec<u16>, IdRangeError> {
    let mut ids = Vec::new();
    for part in input.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match part.split_once('-') {
            Some((start, end)) => {
                let start = parse_one(start)?;
                let end = parse_one(end)?;
                if start > end {
                    return Err(IdRangeError::Reversed { start, end });
                }
                ids.extend(start..=end);
            }
            None => ids.push(parse_one(part)?),
        }
    }

    if ids.is_empty() {
        return Err(IdRangeError::Empty);
    }
    ids.sort_unstable();
    ids.dedup();
    Ok(ids)
}

fn parse_one(text: &str) -> Result<u16, IdRangeError> {
    let text = text.trim();
    text.parse()
        .map_err(|_| IdRangeError::InvalidNumber(text.to_string()))
}
