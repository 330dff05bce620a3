//! Rewrites VNDB image URLs into paths on the local image proxy.
//!
//! Only URLs matching `https://t.vndb.org/{prefix}/{dd}/{id}.{ext}` are
//! accepted; everything else resolves to `None` so an unvalidated remote URL
//! is never handed to the renderer.
use url::{form_urlencoded, Url};

const IMAGE_HOST: &str = "t.vndb.org";
const PROXY_ROOT: &str = "/img";
const OUTPUT_EXTENSION: &str = "webp";

/// Path prefixes served by the proxy (covers, screenshots, characters).
pub const ALLOWED_PREFIXES: &[&str] = &["cv", "cv.t", "sf", "sf.t", "ch"];
/// Widths the proxy will resize to, ascending.
pub const ALLOWED_WIDTHS: &[u32] = &[128, 256, 512];
const ALLOWED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

#[derive(Debug, Clone, Default)]
pub struct ImageOptions {
    /// Requested display width; snapped to [`ALLOWED_WIDTHS`].
    pub width: Option<u32>,
    /// Owning entity, used by the proxy for its content policy.
    pub entity_id: Option<String>,
}

/// Identity of a VNDB image, independent of encoding and size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub prefix: String,
    pub subdir: String,
    pub id: u64,
}

impl ImageRef {
    /// Canonical upstream URL for this image.
    pub fn remote_url(&self) -> String {
        format!(
            "https://{IMAGE_HOST}/{}/{}/{}.jpg",
            self.prefix, self.subdir, self.id
        )
    }
}

/// Map a remote image URL to the local proxy path, or `None` if the URL is
/// absent or outside the accepted grammar.
pub fn resolve_image_url(url: Option<&str>, opts: &ImageOptions) -> Option<String> {
    let image = parse_remote(url?)?;
    let mut out = format!(
        "{PROXY_ROOT}/{}/{}/{}.{OUTPUT_EXTENSION}",
        image.prefix, image.subdir, image.id
    );

    let mut query = form_urlencoded::Serializer::new(String::new());
    let mut has_query = false;
    if let Some(width) = opts.width.map(snap_width) {
        query.append_pair("w", &width.to_string());
        has_query = true;
    }
    if let Some(entity) = opts.entity_id.as_deref().filter(|e| !e.is_empty()) {
        query.append_pair("vn", entity);
        has_query = true;
    }
    if has_query {
        out.push('?');
        out.push_str(&query.finish());
    }
    Some(out)
}

/// Recover the image identity from a proxy path produced by
/// [`resolve_image_url`]. Query parameters are ignored.
pub fn parse_proxy_path(path: &str) -> Option<ImageRef> {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    let rest = path.strip_prefix(PROXY_ROOT)?.strip_prefix('/')?;
    let image = parse_segments(rest)?;
    rest.rsplit_once('.')
        .filter(|(_, ext)| *ext == OUTPUT_EXTENSION)
        .map(|_| image)
}

/// Smallest allowed width that is at least `requested`, capped at the
/// largest.
fn snap_width(requested: u32) -> u32 {
    ALLOWED_WIDTHS
        .iter()
        .copied()
        .find(|w| *w >= requested)
        .unwrap_or(ALLOWED_WIDTHS[ALLOWED_WIDTHS.len() - 1])
}

fn parse_remote(raw: &str) -> Option<ImageRef> {
    let url = Url::parse(raw).ok()?;
    if url.scheme() != "https"
        || url.host_str() != Some(IMAGE_HOST)
        || url.port().is_some()
        || url.query().is_some()
        || url.fragment().is_some()
        || !url.username().is_empty()
        || url.password().is_some()
    {
        return None;
    }
    let image = parse_segments(url.path().strip_prefix('/')?)?;
    let (_, ext) = url.path().rsplit_once('.')?;
    ALLOWED_EXTENSIONS
        .contains(&ext.to_ascii_lowercase().as_str())
        .then_some(image)
}

/// Parse `{prefix}/{dd}/{digits}.{ext}` without judging the extension.
fn parse_segments(path: &str) -> Option<ImageRef> {
    let mut parts = path.split('/');
    let (prefix, subdir, file) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() || !ALLOWED_PREFIXES.contains(&prefix) {
        return None;
    }
    if subdir.len() != 2 || !subdir.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let (stem, _ext) = file.rsplit_once('.')?;
    if stem.is_empty() || stem.len() > 12 || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(ImageRef {
        prefix: prefix.to_string(),
        subdir: subdir.to_string(),
        id: stem.parse().ok()?,
    })
}
