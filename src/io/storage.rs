use crate::config::AwsCredentials;
use crate::types::{CfsiError, CfsiResult};
use aws_config::BehaviorVersion;
use aws_credential_types::provider::SharedCredentialsProvider;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::operation::list_objects_v2::ListObjectsV2Output;
use aws_sdk_s3::types::RequestPayer;
use aws_sdk_s3::Client;
use std::path::{Path, PathBuf};
use tokio::runtime::Runtime;

/// Read-only access to a bucket of tile objects
pub trait ObjectStore: Send + Sync {
    /// Bucket name used to build storage locations
    fn bucket(&self) -> &str;

    /// All object keys under `prefix`
    fn list(&self, prefix: &str) -> CfsiResult<Vec<String>>;

    /// Full content of one object
    fn get(&self, key: &str) -> CfsiResult<Vec<u8>>;

    /// Object content decoded as UTF-8
    fn get_string(&self, key: &str) -> CfsiResult<String> {
        let raw = self.get(key)?;
        String::from_utf8(raw)
            .map_err(|e| CfsiError::InvalidFormat(format!("Object {} is not UTF-8: {}", key, e)))
    }
}

/// Keys under `prefix` that point at tile metadata documents
pub fn list_metadata_keys(store: &dyn ObjectStore, prefix: &str) -> CfsiResult<Vec<String>> {
    let keys = store.list(prefix)?;
    Ok(keys.into_iter().filter(|k| k.ends_with("metadata.xml")).collect())
}

/// Translate a storage URI into a path GDAL can open
pub fn to_gdal_path(uri: &str) -> String {
    if let Some(rest) = uri.strip_prefix("s3://") {
        format!("/vsis3/{}", rest)
    } else if uri.starts_with("http://") || uri.starts_with("https://") {
        format!("/vsicurl/{}", uri)
    } else if let Some(rest) = uri.strip_prefix("file://") {
        rest.to_string()
    } else {
        uri.to_string()
    }
}

/// Requester-pays S3 bucket read through the AWS SDK.
///
/// The store owns a small tokio runtime so the rest of the crate stays
/// synchronous; every call blocks on one SDK request.
pub struct S3Store {
    client: Client,
    bucket: String,
    runtime: Runtime,
}

impl S3Store {
    pub fn connect(bucket: &str, aws: &AwsCredentials) -> CfsiResult<Self> {
        let bucket = bucket.trim_matches('/').to_string();
        if bucket.is_empty() {
            return Err(CfsiError::Config("bucket name cannot be empty".into()));
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()?;

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(aws.region.clone()));
        if let (Some(access_key), Some(secret_key)) = (&aws.access_key_id, &aws.secret_access_key) {
            let credentials = Credentials::new(access_key, secret_key, None, None, "static");
            loader = loader.credentials_provider(SharedCredentialsProvider::new(credentials));
        }
        let shared_config = runtime.block_on(loader.load());
        let client = Client::new(&shared_config);

        Ok(Self { client, bucket, runtime })
    }

    async fn list_async(&self, prefix: &str) -> CfsiResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .request_payer(RequestPayer::Requester)
                .set_continuation_token(token.take())
                .send()
                .await
                .map_err(|e| sdk_error(&format!("list s3://{}/{}", self.bucket, prefix), e))?;

            match collect_page(&page, &mut keys) {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        Ok(keys)
    }

    async fn get_async(&self, key: &str) -> CfsiResult<Vec<u8>> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .request_payer(RequestPayer::Requester)
            .send()
            .await
            .map_err(|e| sdk_error(&format!("get s3://{}/{}", self.bucket, key), e))?;

        let data = output.body.collect().await.map_err(|e| {
            CfsiError::Storage(format!("Cannot read body of s3://{}/{}: {}", self.bucket, key, e))
        })?;
        Ok(data.into_bytes().to_vec())
    }
}

impl std::fmt::Debug for S3Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Store").field("bucket", &self.bucket).finish()
    }
}

fn sdk_error<E, R>(action: &str, err: SdkError<E, R>) -> CfsiError
where
    E: std::error::Error + 'static,
    R: std::fmt::Debug,
{
    CfsiError::Storage(format!("Cannot {}: {}", action, DisplayErrorContext(&err)))
}

/// Append the keys of one listing page; returns the token of the next page
fn collect_page(page: &ListObjectsV2Output, keys: &mut Vec<String>) -> Option<String> {
    keys.extend(
        page.contents()
            .iter()
            .filter_map(|object| object.key())
            .filter(|key| !key.ends_with('/'))
            .map(str::to_string),
    );
    if page.is_truncated() == Some(true) {
        page.next_continuation_token().map(str::to_string)
    } else {
        None
    }
}

impl ObjectStore for S3Store {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn list(&self, prefix: &str) -> CfsiResult<Vec<String>> {
        log::info!("Listing s3://{}/{}", self.bucket, prefix);
        let keys = self.runtime.block_on(self.list_async(prefix))?;
        log::debug!("{} objects under s3://{}/{}", keys.len(), self.bucket, prefix);
        Ok(keys)
    }

    fn get(&self, key: &str) -> CfsiResult<Vec<u8>> {
        self.runtime.block_on(self.get_async(key))
    }
}

/// Objects stored as files below a root directory; keys are relative paths
#[derive(Debug, Clone)]
pub struct LocalStore {
    bucket: String,
    root: PathBuf,
}

impl LocalStore {
    pub fn new<P: AsRef<Path>>(bucket: &str, root: P) -> Self {
        Self { bucket: bucket.to_string(), root: root.as_ref().to_path_buf() }
    }

    fn walk(dir: &Path, root: &Path, keys: &mut Vec<String>) -> CfsiResult<()> {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                Self::walk(&path, root, keys)?;
            } else if let Ok(rel) = path.strip_prefix(root) {
                let key = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                keys.push(key);
            }
        }
        Ok(())
    }
}

impl ObjectStore for LocalStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn list(&self, prefix: &str) -> CfsiResult<Vec<String>> {
        let mut keys = Vec::new();
        if self.root.is_dir() {
            Self::walk(&self.root, &self.root, &mut keys)?;
        }
        keys.retain(|k| k.starts_with(prefix));
        keys.sort();
        Ok(keys)
    }

    fn get(&self, key: &str) -> CfsiResult<Vec<u8>> {
        let path = self.root.join(key);
        std::fs::read(&path)
            .map_err(|e| CfsiError::Storage(format!("Cannot read {}: {}", path.display(), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gdal_paths() {
        assert_eq!(
            to_gdal_path("s3://sentinel-s2-l1c/tiles/35/P/PM/B02.jp2"),
            "/vsis3/sentinel-s2-l1c/tiles/35/P/PM/B02.jp2"
        );
        assert_eq!(
            to_gdal_path("http://bucket.s3.amazonaws.com/a/B02.jp2"),
            "/vsicurl/http://bucket.s3.amazonaws.com/a/B02.jp2"
        );
        assert_eq!(to_gdal_path("file:///tmp/a.tif"), "/tmp/a.tif");
        assert_eq!(to_gdal_path("/tmp/a.tif"), "/tmp/a.tif");
    }

    #[test]
    fn test_listing_pages() {
        let object = |key: &str| aws_sdk_s3::types::Object::builder().key(key).build();
        let mut keys = Vec::new();

        let first = ListObjectsV2Output::builder()
            .contents(object("tiles/35/P/PM/2020/10/5/0/metadata.xml"))
            .contents(object("tiles/35/P/PM/2020/10/5/0/"))
            .is_truncated(true)
            .next_continuation_token("page-2")
            .build();
        assert_eq!(collect_page(&first, &mut keys), Some("page-2".to_string()));

        let last = ListObjectsV2Output::builder()
            .contents(object("tiles/35/P/PM/2020/10/10/0/metadata.xml"))
            .is_truncated(false)
            .build();
        assert_eq!(collect_page(&last, &mut keys), None);

        assert_eq!(
            keys,
            vec![
                "tiles/35/P/PM/2020/10/5/0/metadata.xml".to_string(),
                "tiles/35/P/PM/2020/10/10/0/metadata.xml".to_string(),
            ]
        );

        // truncated without a token cannot be continued
        let broken = ListObjectsV2Output::builder().is_truncated(true).build();
        assert_eq!(collect_page(&broken, &mut keys), None);
    }

    #[test]
    fn test_empty_bucket_rejected() {
        let aws = AwsCredentials { region: "eu-central-1".into(), ..Default::default() };
        assert!(matches!(S3Store::connect("/", &aws), Err(CfsiError::Config(_))));
    }

    #[test]
    fn test_local_store_listing() {
        let dir = tempfile::tempdir().unwrap();
        let tile = dir.path().join("tiles/35/P/PM/2020/10/5/0");
        std::fs::create_dir_all(&tile).unwrap();
        std::fs::write(tile.join("metadata.xml"), "<a/>").unwrap();
        std::fs::write(tile.join("B01.jp2"), [0u8; 4]).unwrap();

        let store = LocalStore::new("sentinel-s2-l1c", dir.path());
        let keys = list_metadata_keys(&store, "tiles/35/P/PM/2020/10/").unwrap();
        assert_eq!(keys, vec!["tiles/35/P/PM/2020/10/5/0/metadata.xml".to_string()]);
        assert_eq!(store.get_string(&keys[0]).unwrap(), "<a/>");
        assert!(store.get("tiles/missing.xml").is_err());
    }
}
