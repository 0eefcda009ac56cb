//! Assets primed into the caches at install time.

use pwakit_net::{Destination, Request, RequestMode};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::partition::Partition;
use crate::ServiceWorkerError;

/// Which list an asset was declared in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetGroup {
    Static,
    Images,
    /// Third-party CDN assets; failures while priming are tolerated.
    External,
}

impl AssetGroup {
    /// Partition the group is primed into.
    pub fn partition(&self) -> Partition {
        match self {
            AssetGroup::Static => Partition::Static,
            AssetGroup::Images => Partition::Images,
            AssetGroup::External => Partition::Dynamic,
        }
    }
}

/// One manifest entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry<'a> {
    pub url: &'a str,
    pub group: AssetGroup,
}

/// The fixed asset lists. Relative URLs resolve against the site origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetManifest {
    #[serde(rename = "static", default)]
    static_assets: Vec<String>,
    #[serde(rename = "images", default)]
    image_assets: Vec<String>,
    #[serde(rename = "external", default)]
    external_assets: Vec<String>,
}

impl Default for AssetManifest {
    fn default() -> Self {
        Self::new(
            [
                "/",
                "/index.html",
                "/about.html",
                "/services.html",
                "/contact.html",
                "/css/style.css",
                "/css/professional-theme.css",
                "/css/animations.css",
                "/css/navigations.css",
                "/css/utilities.css",
                "/css/performance.css",
                "/css/media.css",
                "/script/main.js",
                "/manifest.json",
            ],
            [
                "/images/logo/logo.png",
                "/images/logo/logo.jpeg",
                "/images/radek-grzybowski-eBRTYyjwpRY-unsplash.jpg",
            ],
            [
                "https://cdnjs.cloudflare.com/ajax/libs/font-awesome/6.0.0/css/all.min.css",
                "https://fonts.googleapis.com/css2?family=Inter:wght@300;400;500;600;700&family=Poppins:wght@300;400;500;600;700&display=swap",
            ],
        )
    }
}

impl AssetManifest {
    pub fn new<S, I, E>(static_assets: S, image_assets: I, external_assets: E) -> Self
    where
        S: IntoIterator,
        S::Item: Into<String>,
        I: IntoIterator,
        I::Item: Into<String>,
        E: IntoIterator,
        E::Item: Into<String>,
    {
        Self {
            static_assets: static_assets.into_iter().map(Into::into).collect(),
            image_assets: image_assets.into_iter().map(Into::into).collect(),
            external_assets: external_assets.into_iter().map(Into::into).collect(),
        }
    }

    /// Manifest with no assets.
    pub fn empty() -> Self {
        Self::new(
            Vec::<String>::new(),
            Vec::<String>::new(),
            Vec::<String>::new(),
        )
    }

    pub fn group(&self, group: AssetGroup) -> &[String] {
        match group {
            AssetGroup::Static => &self.static_assets,
            AssetGroup::Images => &self.image_assets,
            AssetGroup::External => &self.external_assets,
        }
    }

    /// Every entry with its group.
    pub fn entries(&self) -> impl Iterator<Item = ManifestEntry<'_>> {
        [AssetGroup::Static, AssetGroup::Images, AssetGroup::External]
            .into_iter()
            .flat_map(move |group| {
                self.group(group)
                    .iter()
                    .map(move |url| ManifestEntry {
                        url: url.as_str(),
                        group,
                    })
            })
    }

    /// GET requests for one group, resolved against `origin`.
    pub fn requests(
        &self,
        group: AssetGroup,
        origin: &Url,
    ) -> Result<Vec<Request>, ServiceWorkerError> {
        let destination = match group {
            AssetGroup::Images => Destination::Image,
            AssetGroup::Static | AssetGroup::External => Destination::Empty,
        };
        let mode = match group {
            AssetGroup::External => RequestMode::Cors,
            AssetGroup::Static | AssetGroup::Images => RequestMode::SameOrigin,
        };

        self.group(group)
            .iter()
            .map(|entry| {
                let url = origin.join(entry)?;
                Ok(Request::get(url).destination(destination).mode(mode))
            })
            .collect()
    }
}
