//! Iteration over `application/x-www-form-urlencoded` and
//! `multipart/form-data` request bodies.
//!
//! Both iterators are built directly over the request body's [`Bytes`] —
//! no intermediate `HashMap` is built unless the caller collects into one.

use bytes::Bytes;

use crate::uri;

/// One decoded field from a form body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormField {
    pub name: String,
    pub value: Bytes,
    /// Only set for multipart fields that carried a `filename` parameter.
    pub filename: Option<String>,
}

/// Iterates the key/value pairs of an `application/x-www-form-urlencoded`
/// body, percent-decoding each half.
pub struct UrlEncodedForm {
    pairs: std::vec::IntoIter<(String, String)>,
}

impl UrlEncodedForm {
    pub fn new(body: &[u8]) -> Self {
        Self {
            pairs: uri::decode_query_string(body).into_iter(),
        }
    }
}

impl Iterator for UrlEncodedForm {
    type Item = FormField;

    fn next(&mut self) -> Option<Self::Item> {
        self.pairs.next().map(|(name, value)| FormField {
            name,
            value: Bytes::from(value),
            filename: None,
        })
    }
}

/// Iterates the parts of a `multipart/form-data` body delimited by
/// `boundary`. Each part's `Content-Disposition` header is parsed for its
/// `name` and optional `filename` parameters; the part body is returned
/// with its trailing CRLF stripped.
pub struct MultipartForm<'a> {
    body: &'a [u8],
    delimiter: Vec<u8>,
    pos: usize,
    finished: bool,
}

impl<'a> MultipartForm<'a> {
    pub fn new(body: &'a [u8], boundary: &[u8]) -> Self {
        let mut delimiter = Vec::with_capacity(boundary.len() + 2);
        delimiter.extend_from_slice(b"--");
        delimiter.extend_from_slice(boundary);

        // Skip to the first boundary line, if present.
        let pos = find(body, &delimiter)
            .map(|p| p + delimiter.len())
            .unwrap_or(body.len());

        Self {
            body,
            delimiter,
            pos,
            finished: false,
        }
    }
}

impl<'a> Iterator for MultipartForm<'a> {
    type Item = FormField;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished || self.pos > self.body.len() {
            return None;
        }

        // The closing boundary is `--BOUNDARY--`; we've already consumed
        // the leading `--BOUNDARY` for it, so what remains starts with `--`.
        if self.body[self.pos..].starts_with(b"--") {
            self.finished = true;
            return None;
        }

        let content_start = match self.body[self.pos..].strip_prefix(b"\r\n") {
            Some(_) => self.pos + 2,
            None => {
                self.finished = true;
                return None;
            }
        };

        let next_delim = find(&self.body[content_start..], &self.delimiter)?;
        let part = &self.body[content_start..content_start + next_delim];
        self.pos = content_start + next_delim + self.delimiter.len();

        parse_part(part)
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn parse_part(part: &[u8]) -> Option<FormField> {
    // A part is `header-line CRLF` * CRLF body, with a leading CRLF from the
    // boundary line already stripped and a trailing CRLF before the next
    // boundary that we strip here.
    let part = part.strip_suffix(b"\r\n").unwrap_or(part);

    let header_end = find(part, b"\r\n\r\n")?;
    let headers_block = &part[..header_end];
    let body = &part[header_end + 4..];

    let mut name = None;
    let mut filename = None;

    for line in headers_block.split(|&b| b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        let line_str = std::str::from_utf8(line).ok()?;
        let (header_name, header_value) = line_str.split_once(':')?;
        if !header_name.trim().eq_ignore_ascii_case("content-disposition") {
            continue;
        }
        for param in header_value.split(';').skip(1) {
            let param = param.trim();
            if let Some(value) = param.strip_prefix("name=") {
                name = Some(value.trim_matches('"').to_string());
            } else if let Some(value) = param.strip_prefix("filename=") {
                filename = Some(value.trim_matches('"').to_string());
            }
        }
    }

    Some(FormField {
        name: name?,
        value: Bytes::copy_from_slice(body),
        filename,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_encoded_decodes_pairs() {
        let body = b"name=John+Doe&age=30";
        let fields: Vec<_> = UrlEncodedForm::new(body).collect();
        assert_eq!(fields[0].name, "name");
        assert_eq!(&fields[0].value[..], b"John Doe");
        assert_eq!(fields[1].name, "age");
        assert_eq!(&fields[1].value[..], b"30");
    }

    #[test]
    fn multipart_parses_single_field() {
        let body = b"--BOUNDARY\r\nContent-Disposition: form-data; name=\"field1\"\r\n\r\nvalue1\r\n--BOUNDARY--\r\n";
        let fields: Vec<_> = MultipartForm::new(body, b"BOUNDARY").collect();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].name, "field1");
        assert_eq!(&fields[0].value[..], b"value1");
        assert_eq!(fields[0].filename, None);
    }

    #[test]
    fn multipart_parses_file_field() {
        let body = b"--BOUNDARY\r\nContent-Disposition: form-data; name=\"upload\"; filename=\"a.txt\"\r\nContent-Type: text/plain\r\n\r\nhello\r\n--BOUNDARY--\r\n";
        let fields: Vec<_> = MultipartForm::new(body, b"BOUNDARY").collect();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].name, "upload");
        assert_eq!(fields[0].filename.as_deref(), Some("a.txt"));
        assert_eq!(&fields[0].value[..], b"hello");
    }

    #[test]
    fn multipart_parses_multiple_fields() {
        let body = b"--B\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\n1\r\n--B\r\nContent-Disposition: form-data; name=\"b\"\r\n\r\n2\r\n--B--\r\n";
        let fields: Vec<_> = MultipartForm::new(body, b"B").collect();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].name, "a");
        assert_eq!(fields[1].name, "b");
    }
}
