//! Request parameters: query string, url-encoded forms, multipart bodies and cookies.
//!
//! Parsing is lazy, it happens on the first call to one of the parameter accessors of a
//! request, and the result (or the failure) is kept for the following calls.

use crate::error::ParseError;
use crate::upload::{NativeUpload, TempFileUpload};
use http::header::{CONTENT_TYPE, COOKIE};
use http::HeaderMap;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

const MAX_PART_HEADERS: usize = 16;

/// Parameters and uploads extracted from a request.
#[derive(Debug, Default)]
pub struct FormData {
    params: Vec<(String, String)>,
    files: Vec<Arc<dyn NativeUpload>>,
}

impl FormData {
    pub fn parse(query: Option<&str>, headers: &HeaderMap, body: &[u8]) -> Result<Self, ParseError> {
        let mut form = FormData::default();

        if let Some(query) = query.filter(|q| !q.is_empty()) {
            form.params = serde_urlencoded::from_str::<Vec<(String, String)>>(query).map_err(ParseError::invalid_params)?;
        }

        let Some(content_type) = headers.get(CONTENT_TYPE) else {
            return Ok(form);
        };
        let content_type = content_type.to_str().map_err(ParseError::invalid_header)?;
        let Ok(mime) = content_type.parse::<mime::Mime>() else {
            return Ok(form);
        };

        match (mime.type_(), mime.subtype()) {
            (mime::APPLICATION, mime::WWW_FORM_URLENCODED) => {
                let pairs = serde_urlencoded::from_bytes::<Vec<(String, String)>>(body).map_err(ParseError::invalid_params)?;
                form.params.extend(pairs);
            }
            (mime::MULTIPART, mime::FORM_DATA) => {
                let boundary = mime
                    .get_param(mime::BOUNDARY)
                    .ok_or_else(|| ParseError::invalid_multipart("missing boundary"))?;
                if let Err(e) = parse_multipart(boundary.as_str(), body, &mut form) {
                    form.destroy();
                    return Err(e);
                }
            }
            _ => {}
        }

        Ok(form)
    }

    /// Distinct parameter names, in the order they first appear.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for (name, _) in &self.params {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        for file in &self.files {
            if !names.iter().any(|n| n == file.name()) {
                names.push(file.name().to_string());
            }
        }
        names
    }

    pub fn values(&self, name: &str) -> Vec<String> {
        self.params.iter().filter(|(n, _)| n == name).map(|(_, v)| v.clone()).collect()
    }

    pub fn files(&self, name: &str) -> Vec<Arc<dyn NativeUpload>> {
        self.files.iter().filter(|f| f.name() == name).cloned().collect()
    }

    pub fn destroy(&self) {
        for file in &self.files {
            file.destroy();
        }
    }
}

/// A [`FormData`] parsed at most once.
#[derive(Debug, Default)]
pub(crate) struct LazyForm {
    cell: OnceLock<Result<FormData, ParseError>>,
}

impl LazyForm {
    pub(crate) fn get(&self, query: Option<&str>, headers: &HeaderMap, body: &[u8]) -> Result<&FormData, ParseError> {
        self.cell.get_or_init(|| FormData::parse(query, headers, body)).as_ref().map_err(Clone::clone)
    }

    pub(crate) fn destroy(&self) {
        if let Some(Ok(form)) = self.cell.get() {
            form.destroy();
        }
    }
}

fn parse_multipart(boundary: &str, body: &[u8], form: &mut FormData) -> Result<(), ParseError> {
    let delimiter = format!("--{boundary}");
    let delimiter = delimiter.as_bytes();

    let start = find(body, delimiter).ok_or_else(|| ParseError::invalid_multipart("missing first boundary"))?;
    let mut rest = &body[start + delimiter.len()..];

    loop {
        if rest.starts_with(b"--") {
            return Ok(());
        }
        rest = rest.strip_prefix(b"\r\n").ok_or_else(|| ParseError::invalid_multipart("missing line break after boundary"))?;

        let mut headers = [httparse::EMPTY_HEADER; MAX_PART_HEADERS];
        let (consumed, part_headers) = match httparse::parse_headers(rest, &mut headers) {
            Ok(httparse::Status::Complete((consumed, part_headers))) => (consumed, part_headers),
            Ok(httparse::Status::Partial) => return Err(ParseError::invalid_multipart("incomplete part headers")),
            Err(e) => return Err(ParseError::invalid_multipart(e)),
        };

        let mut disposition = None;
        let mut content_type = None;
        for header in part_headers.iter() {
            let value = std::str::from_utf8(header.value).map_err(ParseError::invalid_multipart)?;
            if header.name.eq_ignore_ascii_case("content-disposition") {
                disposition = Some(value.to_string());
            } else if header.name.eq_ignore_ascii_case("content-type") {
                content_type = Some(value.to_string());
            }
        }
        rest = &rest[consumed..];

        let mut closing = Vec::with_capacity(delimiter.len() + 2);
        closing.extend_from_slice(b"\r\n");
        closing.extend_from_slice(delimiter);
        let end = find(rest, &closing).ok_or_else(|| ParseError::invalid_multipart("missing closing boundary"))?;
        let data = &rest[..end];
        rest = &rest[end + closing.len()..];

        let disposition = disposition.ok_or_else(|| ParseError::invalid_multipart("missing content-disposition"))?;
        let name = disposition_param(&disposition, "name")
            .ok_or_else(|| ParseError::invalid_multipart("missing field name"))?;

        match disposition_param(&disposition, "filename") {
            Some(file_name) => {
                let upload = TempFileUpload::create(name, Some(file_name), content_type, data)
                    .map_err(|e| ParseError::invalid_multipart(format!("unable to store upload: {e}")))?;
                form.files.push(Arc::new(upload));
            }
            None => {
                let value = String::from_utf8(data.to_vec()).map_err(ParseError::invalid_multipart)?;
                form.params.push((name, value));
            }
        }
    }
}

fn disposition_param(disposition: &str, key: &str) -> Option<String> {
    disposition.split(';').skip(1).find_map(|part| {
        let (k, v) = part.trim().split_once('=')?;
        k.trim().eq_ignore_ascii_case(key).then(|| v.trim().trim_matches('"').to_string())
    })
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|window| window == needle)
}

/// Parses every `Cookie` header into a name to value map, the first occurrence of a name wins.
pub fn parse_cookies(headers: &HeaderMap) -> HashMap<String, String> {
    let mut cookies = HashMap::new();
    for value in headers.get_all(COOKIE) {
        let Ok(value) = value.to_str() else {
            continue;
        };
        for pair in value.split(';') {
            if let Some((name, value)) = pair.split_once('=') {
                cookies.entry(name.trim().to_string()).or_insert_with(|| value.trim().trim_matches('"').to_string());
            }
        }
    }
    cookies
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn headers(content_type: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        headers
    }

    #[test]
    fn test_query_and_form() {
        let form = FormData::parse(
            Some("a=1&b=2&a=3"),
            &headers("application/x-www-form-urlencoded"),
            b"c=hello+world&a=4",
        )
        .unwrap();

        assert_eq!(form.names(), vec!["a", "b", "c"]);
        assert_eq!(form.values("a"), vec!["1", "3", "4"]);
        assert_eq!(form.values("c"), vec!["hello world"]);
        assert!(form.values("missing").is_empty());
    }

    #[test]
    fn test_multipart() {
        let body = b"--XyZ\r\n\
Content-Disposition: form-data; name=\"title\"\r\n\r\n\
hello\r\n\
--XyZ\r\n\
Content-Disposition: form-data; name=\"doc\"; filename=\"a.txt\"\r\n\
Content-Type: text/plain\r\n\r\n\
file content\r\n\
--XyZ--\r\n";

        let form = FormData::parse(None, &headers("multipart/form-data; boundary=XyZ"), body).unwrap();
        assert_eq!(form.values("title"), vec!["hello"]);

        let files = form.files("doc");
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].file_name(), Some("a.txt"));
        assert_eq!(files[0].content_type(), Some("text/plain"));
        assert_eq!(files[0].bytes().unwrap().as_ref(), b"file content");

        let path = files[0].path().to_path_buf();
        form.destroy();
        assert!(!path.exists());
    }

    #[test]
    fn test_multipart_without_closing_boundary() {
        let body = b"--XyZ\r\nContent-Disposition: form-data; name=\"title\"\r\n\r\nhello";
        let result = FormData::parse(None, &headers("multipart/form-data; boundary=XyZ"), body);
        assert!(matches!(result, Err(ParseError::InvalidMultipart { .. })));
    }

    #[test]
    fn test_malformed_escape_is_kept_verbatim() {
        let form = FormData::parse(Some("a=%zz"), &HeaderMap::new(), b"").unwrap();
        assert_eq!(form.values("a"), vec!["%zz"]);
    }

    #[test]
    fn test_cookies() {
        let mut headers = HeaderMap::new();
        headers.append(COOKIE, HeaderValue::from_static("sid=abc; theme=\"dark\""));
        headers.append(COOKIE, HeaderValue::from_static("sid=ignored"));

        let cookies = parse_cookies(&headers);
        assert_eq!(cookies.get("sid").map(String::as_str), Some("abc"));
        assert_eq!(cookies.get("theme").map(String::as_str), Some("dark"));
    }
}
