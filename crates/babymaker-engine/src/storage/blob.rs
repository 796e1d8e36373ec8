use std::time::Duration;

use babymaker_contracts::errors::GenerationError;
use babymaker_contracts::results::StoredRef;
use chrono::{DateTime, Utc};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;

use super::{validate_object_name, StorageBucket, StorageSink, StoredObject};
use crate::client::ImageBytes;

const API_VERSION: &str = "2021-08-06";
const MAX_NAME_ATTEMPTS: usize = 20;
const MAX_LIST_PAGES: usize = 1000;

/// Endpoint and SAS token pulled out of an Azure storage connection string.
#[derive(Debug, Clone, PartialEq)]
pub struct BlobConnection {
    pub endpoint: String,
    pub sas_token: String,
}

impl BlobConnection {
    /// Accepts `BlobEndpoint=...;SharedAccessSignature=...`, or the
    /// `AccountName`/`EndpointSuffix` form with a `SharedAccessSignature`.
    /// Account-key signing is not supported.
    pub fn parse(connection_string: &str) -> Result<Self, GenerationError> {
        let mut blob_endpoint = None;
        let mut account_name = None;
        let mut protocol = "https".to_string();
        let mut suffix = "core.windows.net".to_string();
        let mut sas_token = None;
        let mut has_account_key = false;

        for part in connection_string.split(';') {
            let Some((key, value)) = part.trim().split_once('=') else {
                continue;
            };
            let value = value.trim().to_string();
            match key.trim().to_ascii_lowercase().as_str() {
                "blobendpoint" => blob_endpoint = Some(value),
                "accountname" => account_name = Some(value),
                "defaultendpointsprotocol" => protocol = value,
                "endpointsuffix" => suffix = value,
                "sharedaccesssignature" => sas_token = Some(value),
                "accountkey" => has_account_key = true,
                _ => {}
            }
        }

        let Some(sas_token) = sas_token.filter(|value| !value.is_empty()) else {
            let detail = if has_account_key {
                "connection string uses an account key; provide a SharedAccessSignature instead"
            } else {
                "connection string has no SharedAccessSignature"
            };
            return Err(GenerationError::NotConfigured(detail.to_string()));
        };
        let endpoint = match (blob_endpoint, account_name) {
            (Some(endpoint), _) => endpoint,
            (None, Some(account)) => format!("{protocol}://{account}.blob.{suffix}"),
            (None, None) => {
                return Err(GenerationError::NotConfigured(
                    "connection string has neither BlobEndpoint nor AccountName".to_string(),
                ))
            }
        };
        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            sas_token: sas_token.trim_start_matches('?').to_string(),
        })
    }

    pub fn blob_url(&self, container: &str, name: &str) -> String {
        format!("{}/{container}/{name}", self.endpoint)
    }

    pub fn signed_url(&self, container: &str, name: &str) -> String {
        format!("{}?{}", self.blob_url(container, name), self.sas_token)
    }

    /// `restype=container` plus the SAS token; further query pairs are
    /// appended by the caller.
    pub fn container_url(&self, container: &str) -> String {
        format!(
            "{}/{container}?restype=container&{}",
            self.endpoint, self.sas_token
        )
    }
}

/// Uploads block blobs with a SAS token.
pub struct BlobSink {
    connection: BlobConnection,
    http: HttpClient,
}

impl BlobSink {
    pub fn new(connection: BlobConnection, timeout: Duration) -> Result<Self, GenerationError> {
        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| GenerationError::NotConfigured(format!("http client: {err}")))?;
        Ok(Self { connection, http })
    }

    fn put(
        &self,
        image: &ImageBytes,
        container: &str,
        name: &str,
    ) -> Result<StatusCode, GenerationError> {
        let response = self
            .http
            .put(self.connection.signed_url(container, name))
            .header("x-ms-blob-type", "BlockBlob")
            .header("x-ms-version", API_VERSION)
            .header("If-None-Match", "*")
            .header(CONTENT_TYPE, image.content_type())
            .body(image.bytes.clone())
            .send()
            .map_err(|err| {
                GenerationError::StorageFailure(format!("upload {container}/{name}: {err}"))
            })?;
        Ok(response.status())
    }
}

impl StorageSink for BlobSink {
    fn name(&self) -> &str {
        "azure-blob"
    }

    fn is_remote(&self) -> bool {
        true
    }

    fn persist(
        &self,
        image: &ImageBytes,
        bucket: StorageBucket,
        identifier: &str,
    ) -> Result<StoredRef, GenerationError> {
        let container = bucket.name();
        let ext = image.extension();
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let name = if attempt == 0 {
                format!("{identifier}.{ext}")
            } else {
                format!("{identifier}-{attempt}.{ext}")
            };
            let status = self.put(image, container, &name)?;
            if status.is_success() {
                return Ok(StoredRef::Blob {
                    container: container.to_string(),
                    url: self.connection.blob_url(container, &name),
                    download_url: self.connection.signed_url(container, &name),
                    name,
                });
            }
            // 409 BlobAlreadyExists / 412 condition failed: the name is taken.
            if matches!(status.as_u16(), 409 | 412) {
                continue;
            }
            return Err(GenerationError::StorageFailure(format!(
                "upload {container}/{name} returned {}",
                status.as_u16()
            )));
        }
        Err(GenerationError::StorageFailure(format!(
            "no free blob name for {identifier} in {container}"
        )))
    }

    fn fetch_url(&self, stored: &StoredRef) -> Option<String> {
        match stored {
            StoredRef::Blob {
                container, name, ..
            } => Some(self.connection.signed_url(container, name)),
            StoredRef::Local { .. } => None,
        }
    }

    fn list(&self, bucket: StorageBucket) -> Result<Vec<StoredObject>, GenerationError> {
        let container = bucket.name();
        let mut objects = Vec::new();
        let mut marker: Option<String> = None;
        for _ in 0..MAX_LIST_PAGES {
            let mut request = self
                .http
                .get(self.connection.container_url(container))
                .query(&[("comp", "list")])
                .header("x-ms-version", API_VERSION);
            if let Some(marker) = &marker {
                request = request.query(&[("marker", marker.as_str())]);
            }
            let response = request.send().map_err(|err| {
                GenerationError::StorageFailure(format!("list {container}: {err}"))
            })?;
            let status = response.status();
            let body = response.text().map_err(|err| {
                GenerationError::StorageFailure(format!("list {container}: {err}"))
            })?;
            if !status.is_success() {
                return Err(GenerationError::StorageFailure(format!(
                    "list {container} returned {}",
                    status.as_u16()
                )));
            }
            let (page, next) = parse_blob_list(&body)?;
            objects.extend(page);
            match next {
                Some(next) => marker = Some(next),
                None => return Ok(objects),
            }
        }
        Err(GenerationError::StorageFailure(format!(
            "list {container} did not finish after {MAX_LIST_PAGES} pages"
        )))
    }

    fn delete(&self, bucket: StorageBucket, name: &str) -> Result<(), GenerationError> {
        validate_object_name(name)?;
        let container = bucket.name();
        let response = self
            .http
            .delete(self.connection.signed_url(container, name))
            .header("x-ms-version", API_VERSION)
            .send()
            .map_err(|err| {
                GenerationError::StorageFailure(format!("delete {container}/{name}: {err}"))
            })?;
        if response.status().is_success() {
            return Ok(());
        }
        Err(GenerationError::StorageFailure(format!(
            "delete {container}/{name} returned {}",
            response.status().as_u16()
        )))
    }

    fn check(&self) -> Result<String, GenerationError> {
        for bucket in StorageBucket::ALL {
            let container = bucket.name();
            let response = self
                .http
                .get(self.connection.container_url(container))
                .header("x-ms-version", API_VERSION)
                .send()
                .map_err(|err| {
                    GenerationError::StorageFailure(format!("reach {container}: {err}"))
                })?;
            match response.status().as_u16() {
                200..=299 => {}
                404 => {
                    return Err(GenerationError::StorageFailure(format!(
                        "container {container} does not exist"
                    )))
                }
                401 | 403 => {
                    return Err(GenerationError::StorageFailure(format!(
                        "access to {container} denied; check the SharedAccessSignature"
                    )))
                }
                code => {
                    return Err(GenerationError::StorageFailure(format!(
                        "container {container} returned {code}"
                    )))
                }
            }
        }
        Ok(format!(
            "azure-blob ({}, {} containers reachable)",
            self.connection.endpoint,
            StorageBucket::ALL.len()
        ))
    }
}

/// Reads one page of a List Blobs answer: the entries plus the
/// continuation marker, if any.
fn parse_blob_list(
    xml: &str,
) -> Result<(Vec<StoredObject>, Option<String>), GenerationError> {
    let mut objects = Vec::new();
    for blob in xml_blocks(xml, "Blob") {
        let Some(name) = xml_text(blob, "Name") else {
            continue;
        };
        let modified = xml_text(blob, "Last-Modified").ok_or_else(|| {
            GenerationError::StorageFailure(format!("blob {name} has no Last-Modified"))
        })?;
        let last_modified = DateTime::parse_from_rfc2822(&modified)
            .map_err(|err| {
                GenerationError::StorageFailure(format!(
                    "blob {name} has unreadable Last-Modified {modified:?}: {err}"
                ))
            })?
            .with_timezone(&Utc);
        let size = xml_text(blob, "Content-Length")
            .and_then(|value| value.parse().ok())
            .unwrap_or(0);
        objects.push(StoredObject {
            name,
            size,
            last_modified,
        });
    }
    let next = xml_text(xml, "NextMarker").filter(|marker| !marker.is_empty());
    Ok((objects, next))
}

fn xml_blocks<'a>(xml: &'a str, tag: &str) -> Vec<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let mut blocks = Vec::new();
    let mut rest = xml;
    while let Some(start) = rest.find(&open) {
        let after = &rest[start + open.len()..];
        let Some(end) = after.find(&close) else {
            break;
        };
        blocks.push(&after[..end]);
        rest = &after[end + close.len()..];
    }
    blocks
}

fn xml_text(xml: &str, tag: &str) -> Option<String> {
    xml_blocks(xml, tag).first().map(|text| {
        text.trim()
            .replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&quot;", "\"")
            .replace("&apos;", "'")
            .replace("&amp;", "&")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::StubServer;

    fn stub_sink(server: &StubServer) -> anyhow::Result<BlobSink> {
        let connection = BlobConnection::parse(&format!(
            "BlobEndpoint={};SharedAccessSignature=sv=1&sp=racwdl&sig=SECRET",
            server.base_url()
        ))?;
        Ok(BlobSink::new(connection, Duration::from_secs(5))?)
    }

    fn png() -> ImageBytes {
        ImageBytes::new(b"\x89PNG\r\n\x1a\npixels".to_vec(), None)
    }

    fn listing(blobs: &[(&str, &str)], next_marker: &str) -> String {
        let entries: String = blobs
            .iter()
            .map(|(name, modified)| {
                format!(
                    "<Blob><Name>{name}</Name><Properties><Last-Modified>{modified}</Last-Modified><Content-Length>6</Content-Length></Properties></Blob>"
                )
            })
            .collect();
        format!(
            r#"<?xml version="1.0" encoding="utf-8"?><EnumerationResults ContainerName="temp-uploads"><Blobs>{entries}</Blobs><NextMarker>{next_marker}</NextMarker></EnumerationResults>"#
        )
    }

    #[test]
    fn persisted_blob_reference_is_signed() -> anyhow::Result<()> {
        let server = StubServer::start(vec![(412, String::new()), (201, String::new())])?;
        let sink = stub_sink(&server)?;
        let stored = sink.persist(&png(), StorageBucket::GeneratedBabies, "baby_1")?;

        let base = server.base_url();
        assert_eq!(
            stored,
            StoredRef::Blob {
                container: "generated-babies".to_string(),
                name: "baby_1-1.png".to_string(),
                url: format!("{base}/generated-babies/baby_1-1.png"),
                download_url: format!(
                    "{base}/generated-babies/baby_1-1.png?sv=1&sp=racwdl&sig=SECRET"
                ),
            }
        );
        assert!(stored.to_string().ends_with("sig=SECRET"));

        let requests = server.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].method, "PUT");
        assert_eq!(requests[0].header("x-ms-blob-type"), Some("BlockBlob"));
        assert_eq!(requests[0].header("if-none-match"), Some("*"));
        assert_eq!(requests[1].path, "/generated-babies/baby_1-1.png?sv=1&sp=racwdl&sig=SECRET");
        assert_eq!(requests[1].body, png().bytes);
        Ok(())
    }

    #[test]
    fn list_follows_continuation_markers() -> anyhow::Result<()> {
        let server = StubServer::start(vec![
            (
                200,
                listing(&[("a.png", "Mon, 01 Jan 2024 00:00:00 GMT")], "page-2"),
            ),
            (
                200,
                listing(&[("b&amp;c.png", "Tue, 02 Jan 2024 12:30:00 GMT")], ""),
            ),
        ])?;
        let objects = stub_sink(&server)?.list(StorageBucket::TempUploads)?;
        let names: Vec<&str> = objects.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, ["a.png", "b&c.png"]);
        assert_eq!(objects[0].size, 6);
        assert_eq!(
            objects[1].last_modified.to_rfc3339(),
            "2024-01-02T12:30:00+00:00"
        );

        let requests = server.requests();
        assert!(requests[0].path.starts_with("/temp-uploads?restype=container&sv=1"));
        assert!(requests[0].path.contains("comp=list"));
        assert!(requests[1].path.contains("marker=page-2"));
        Ok(())
    }

    #[test]
    fn cleanup_deletes_stale_blobs() -> anyhow::Result<()> {
        let now = Utc::now();
        let old = (now - chrono::Duration::hours(48)).to_rfc2822();
        let recent = (now - chrono::Duration::hours(1)).to_rfc2822();
        let server = StubServer::start(vec![
            (200, listing(&[("old.png", old.as_str()), ("new.png", recent.as_str())], "")),
            (202, String::new()),
        ])?;
        let sink = stub_sink(&server)?;
        let deleted = super::super::cleanup_older_than(
            &sink,
            StorageBucket::TempUploads,
            chrono::Duration::hours(24),
            now,
        )?;
        assert_eq!(deleted, ["old.png"]);

        let requests = server.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].method, "DELETE");
        assert!(requests[1].path.starts_with("/temp-uploads/old.png?"));
        Ok(())
    }

    #[test]
    fn check_reports_missing_container() -> anyhow::Result<()> {
        let server = StubServer::start(vec![(200, String::new()), (404, String::new())])?;
        let err = stub_sink(&server)?.check().unwrap_err();
        assert_eq!(
            err,
            GenerationError::StorageFailure(
                "container generated-babies does not exist".to_string()
            )
        );

        let server = StubServer::start(vec![(403, String::new())])?;
        let err = stub_sink(&server)?.check().unwrap_err();
        assert!(err.to_string().contains("SharedAccessSignature"));

        let server = StubServer::start(vec![(200, String::new()); 4])?;
        let summary = stub_sink(&server)?.check()?;
        assert!(summary.contains("4 containers reachable"));
        Ok(())
    }

    #[test]
    fn unreadable_listing_dates_are_storage_failures() {
        let xml = listing(&[("a.png", "yesterday")], "");
        let err = parse_blob_list(&xml).unwrap_err();
        assert_eq!(err.kind(), "storage_failure");
    }

    #[test]
    fn parses_blob_endpoint_with_sas() -> anyhow::Result<()> {
        let connection = BlobConnection::parse(
            "BlobEndpoint=https://acct.blob.core.windows.net/;SharedAccessSignature=sv=2022-11-02&ss=b&sig=abc%3D",
        )?;
        assert_eq!(connection.endpoint, "https://acct.blob.core.windows.net");
        assert_eq!(connection.sas_token, "sv=2022-11-02&ss=b&sig=abc%3D");
        assert_eq!(
            connection.signed_url("generated-babies", "baby_1.png"),
            "https://acct.blob.core.windows.net/generated-babies/baby_1.png?sv=2022-11-02&ss=b&sig=abc%3D"
        );
        Ok(())
    }

    #[test]
    fn builds_endpoint_from_account_name() -> anyhow::Result<()> {
        let connection = BlobConnection::parse(
            "DefaultEndpointsProtocol=https;AccountName=babies;EndpointSuffix=core.windows.net;SharedAccessSignature=?sv=1&sig=x",
        )?;
        assert_eq!(connection.endpoint, "https://babies.blob.core.windows.net");
        assert_eq!(connection.sas_token, "sv=1&sig=x");
        Ok(())
    }

    #[test]
    fn account_key_only_is_rejected() {
        let err = BlobConnection::parse(
            "DefaultEndpointsProtocol=https;AccountName=babies;AccountKey=c2VjcmV0==;EndpointSuffix=core.windows.net",
        )
        .unwrap_err();
        assert_eq!(err.kind(), "not_configured");
        assert!(err.to_string().contains("account key"));
    }

    #[test]
    fn missing_endpoint_is_rejected() {
        let err = BlobConnection::parse("SharedAccessSignature=sv=1&sig=x").unwrap_err();
        assert_eq!(err.kind(), "not_configured");
    }

    #[test]
    fn fetch_url_signs_blob_refs_only() -> anyhow::Result<()> {
        let connection = BlobConnection::parse(
            "BlobEndpoint=https://acct.blob.core.windows.net;SharedAccessSignature=sig=x",
        )?;
        let sink = BlobSink::new(connection, Duration::from_secs(5))?;
        let stored = StoredRef::Blob {
            container: "parent-photos".to_string(),
            name: "parent_1.jpg".to_string(),
            url: "https://acct.blob.core.windows.net/parent-photos/parent_1.jpg".to_string(),
            download_url: "https://acct.blob.core.windows.net/parent-photos/parent_1.jpg?sig=x"
                .to_string(),
        };
        assert_eq!(
            sink.fetch_url(&stored).as_deref(),
            Some("https://acct.blob.core.windows.net/parent-photos/parent_1.jpg?sig=x")
        );
        let local = StoredRef::Local {
            path: "generated_images/a.png".into(),
        };
        assert_eq!(sink.fetch_url(&local), None);
        Ok(())
    }
}
