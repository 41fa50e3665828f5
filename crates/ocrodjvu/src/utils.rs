//! Small helpers shared by the pipeline and the command-line front end.

use crate::error::{OcrodjvuError, Result};
use std::path::Path;

/// Parse a page selection such as `17,37-42` into 1-based page numbers.
///
/// Ranges are inclusive; a reversed range (`42-37`) selects nothing.
pub fn parse_page_numbers(pages: &str) -> Result<Vec<usize>> {
    let parse = |number: &str| -> Result<usize> {
        number
            .trim()
            .parse::<usize>()
            .map_err(|e| OcrodjvuError::validation_with_source(format!("invalid page number: {:?}", number), e))
    };
    let mut result = Vec::new();
    for range in pages.split(',') {
        match range.split_once('-') {
            Some((first, last)) => result.extend(parse(first)?..=parse(last)?),
            None => result.push(parse(range)?),
        }
    }
    Ok(result)
}

/// Per-engine thread limit so that `jobs` workers do not oversubscribe the CPU.
pub fn thread_limit(pages: usize, jobs: usize) -> usize {
    if pages == 0 {
        return 1;
    }
    (jobs / pages).max(1)
}

enum Value {
    Number(i64),
    Text(String),
}

/// Expand a raw OCR filename template.
///
/// Fields: `{page}` (1-based page number), `{id}` (page identifier),
/// `{id-ext}` (identifier without extension), and `{page+N}` / `{page-N}`.
/// A format spec of the form `:W` or `:0W` pads to width `W`. `{{` and `}}`
/// are literal braces.
pub fn expand_template(template: &str, page_number: usize, page_id: &str) -> Result<String> {
    let id_ext = Path::new(page_id)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .map(|stem| match Path::new(page_id).parent().and_then(|p| p.to_str()) {
            Some(parent) if !parent.is_empty() => format!("{}/{}", parent, stem),
            _ => stem.to_string(),
        })
        .unwrap_or_else(|| page_id.to_string());
    let page = page_number as i64;

    let lookup = |field: &str| -> Result<Value> {
        match field {
            "page" => return Ok(Value::Number(page)),
            "id" => return Ok(Value::Text(page_id.to_string())),
            "id-ext" => return Ok(Value::Text(id_ext.clone())),
            _ => {}
        }
        let offset = field
            .strip_prefix("page+")
            .and_then(|n| n.parse::<i64>().ok())
            .or_else(|| field.strip_prefix("page-").and_then(|n| n.parse::<i64>().ok()).map(|n| -n));
        match offset {
            Some(offset) => Ok(Value::Number(page + offset)),
            None => Err(OcrodjvuError::validation(format!(
                "cannot parse filename template {:?}: unknown field {:?}",
                template, field
            ))),
        }
    };

    let mut out = String::with_capacity(template.len() + 8);
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut field = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) => field.push(c),
                        None => {
                            return Err(OcrodjvuError::validation(format!(
                                "cannot parse filename template {:?}: unmatched '{{'",
                                template
                            )));
                        }
                    }
                }
                let (name, spec) = match field.split_once(':') {
                    Some((name, spec)) => (name, Some(spec)),
                    None => (field.as_str(), None),
                };
                let value = lookup(name)?;
                out.push_str(&format_value(&value, spec, template)?);
            }
            '}' => {
                return Err(OcrodjvuError::validation(format!(
                    "cannot parse filename template {:?}: single '}}' encountered",
                    template
                )));
            }
            c => out.push(c),
        }
    }
    Ok(out)
}

fn format_value(value: &Value, spec: Option<&str>, template: &str) -> Result<String> {
    let Some(spec) = spec.filter(|spec| !spec.is_empty()) else {
        return Ok(match value {
            Value::Number(n) => n.to_string(),
            Value::Text(text) => text.clone(),
        });
    };
    let zero = spec.starts_with('0');
    let width: usize = spec.parse().map_err(|e| {
        OcrodjvuError::validation_with_source(
            format!("cannot parse filename template {:?}: bad format spec {:?}", template, spec),
            e,
        )
    })?;
    Ok(match value {
        Value::Number(n) if zero => format!("{:0width$}", n, width = width),
        Value::Number(n) => format!("{:>width$}", n, width = width),
        Value::Text(text) => format!("{:<width$}", text, width = width),
    })
}

/// Check a template before any page is processed.
pub fn validate_template(template: &str) -> Result<()> {
    expand_template(template, 0, "").map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_page_numbers() {
        assert_eq!(parse_page_numbers("17").unwrap(), vec![17]);
        assert_eq!(parse_page_numbers("37-42").unwrap(), vec![37, 38, 39, 40, 41, 42]);
        assert_eq!(parse_page_numbers("17,37-39").unwrap(), vec![17, 37, 38, 39]);
        assert_eq!(parse_page_numbers("42-37").unwrap(), Vec::<usize>::new());
        assert_eq!(parse_page_numbers("17-17").unwrap(), vec![17]);
        assert!(parse_page_numbers("x").is_err());
        assert!(parse_page_numbers("1-").is_err());
    }

    #[test]
    fn test_thread_limit() {
        assert_eq!(thread_limit(0, 8), 1);
        assert_eq!(thread_limit(2, 8), 4);
        assert_eq!(thread_limit(10, 4), 1);
    }

    #[test]
    fn test_expand_template_fields() {
        assert_eq!(expand_template("{id-ext}", 3, "p0003.djvu").unwrap(), "p0003");
        assert_eq!(expand_template("{id}", 3, "p0003.djvu").unwrap(), "p0003.djvu");
        assert_eq!(expand_template("page{page}", 3, "x").unwrap(), "page3");
        assert_eq!(expand_template("{page+10}-{page-1}", 3, "x").unwrap(), "13-2");
    }

    #[test]
    fn test_expand_template_format_spec() {
        assert_eq!(expand_template("{page:04}.html", 7, "x").unwrap(), "0007.html");
        assert_eq!(expand_template("{{{page}}}", 7, "x").unwrap(), "{7}");
    }

    #[test]
    fn test_expand_template_errors() {
        assert!(expand_template("{pages}", 1, "x").is_err());
        assert!(expand_template("{page", 1, "x").is_err());
        assert!(expand_template("page}", 1, "x").is_err());
        assert!(validate_template("{id-ext}").is_ok());
    }
}
