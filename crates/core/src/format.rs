//! Positional template substitution (`{0}`, `{1,-8}`, `{{` / `}}`).
//!
//! Substitution is strict: every placeholder must have an argument and every
//! argument must be referenced. Any mismatch is reported as a [`FormatError`]
//! and the caller decides what to show instead.

use std::fmt::{self, Write as _};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    #[error("unbalanced '{ch}' at byte {pos}")]
    Unbalanced { ch: char, pos: usize },
    #[error("invalid placeholder '{{{0}}}'")]
    InvalidPlaceholder(String),
    #[error("format specifier in '{{{0}}}' is not supported")]
    UnsupportedSpecifier(String),
    #[error("placeholder {index} has no argument ({given} supplied)")]
    MissingArgument { index: usize, given: usize },
    #[error("argument {index} is not referenced by the template")]
    UnusedArgument { index: usize },
}

struct Placeholder {
    index: usize,
    alignment: Option<i32>,
}

fn parse_placeholder(inner: &str) -> Result<Placeholder, FormatError> {
    if inner.contains(':') {
        return Err(FormatError::UnsupportedSpecifier(inner.to_string()));
    }
    let (index_part, align_part) = match inner.split_once(',') {
        Some((i, a)) => (i, Some(a)),
        None => (inner, None),
    };
    let index_part = index_part.trim();
    if index_part.is_empty() || !index_part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(FormatError::InvalidPlaceholder(inner.to_string()));
    }
    let index = index_part
        .parse::<usize>()
        .map_err(|_| FormatError::InvalidPlaceholder(inner.to_string()))?;
    let alignment = match align_part {
        Some(a) => Some(
            a.trim()
                .parse::<i32>()
                .map_err(|_| FormatError::InvalidPlaceholder(inner.to_string()))?,
        ),
        None => None,
    };
    Ok(Placeholder { index, alignment })
}

fn write_aligned(out: &mut String, value: &str, alignment: Option<i32>) {
    let Some(align) = alignment else {
        out.push_str(value);
        return;
    };
    let width = align.unsigned_abs() as usize;
    let len = value.chars().count();
    let pad = width.saturating_sub(len);
    if align < 0 {
        out.push_str(value);
        out.extend(std::iter::repeat_n(' ', pad));
    } else {
        out.extend(std::iter::repeat_n(' ', pad));
        out.push_str(value);
    }
}

pub fn format_positional(template: &str, args: &[&dyn fmt::Display]) -> Result<String, FormatError> {
    let mut out = String::with_capacity(template.len());
    let mut used = vec![false; args.len()];
    let mut rendered = String::new();
    let mut iter = template.char_indices().peekable();

    while let Some((pos, ch)) = iter.next() {
        match ch {
            '{' => {
                if iter.next_if(|&(_, c)| c == '{').is_some() {
                    out.push('{');
                    continue;
                }
                let start = pos + 1;
                let mut end = None;
                for (p, c) in iter.by_ref() {
                    match c {
                        '}' => {
                            end = Some(p);
                            break;
                        }
                        '{' => return Err(FormatError::Unbalanced { ch: '{', pos }),
                        _ => {}
                    }
                }
                let end = end.ok_or(FormatError::Unbalanced { ch: '{', pos })?;
                let ph = parse_placeholder(&template[start..end])?;
                let arg = args.get(ph.index).ok_or(FormatError::MissingArgument {
                    index: ph.index,
                    given: args.len(),
                })?;
                used[ph.index] = true;

                rendered.clear();
                let _ = write!(rendered, "{arg}");
                write_aligned(&mut out, &rendered, ph.alignment);
            }
            '}' => {
                if iter.next_if(|&(_, c)| c == '}').is_some() {
                    out.push('}');
                } else {
                    return Err(FormatError::Unbalanced { ch: '}', pos });
                }
            }
            _ => out.push(ch),
        }
    }

    if let Some(index) = used.iter().position(|u| !u) {
        return Err(FormatError::UnusedArgument { index });
    }
    Ok(out)
}
