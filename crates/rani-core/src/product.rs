//! Product identity, presets, and citation URL completion.
//!
//! Each deployment serves exactly one product. The presets below are the
//! defaults for display name, documentation host, and version set; every
//! field can be overridden from configuration.

use std::fmt;
use std::str::FromStr;

use url::Url;

use crate::error::{RagError, Result};
use crate::version::VersionCatalog;

/// The documented product families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Product {
    Actions,
    Pro,
    Express,
}

/// Built-in defaults for one product.
#[derive(Debug, Clone, Copy)]
pub struct ProductPreset {
    pub display_name: &'static str,
    pub base_url: &'static str,
    pub versions: &'static [&'static str],
    pub default_version: &'static str,
    pub latest_version: &'static str,
}

impl Product {
    pub fn slug(&self) -> &'static str {
        match self {
            Product::Actions => "actions",
            Product::Pro => "pro",
            Product::Express => "express",
        }
    }

    pub fn preset(&self) -> ProductPreset {
        match self {
            Product::Actions => ProductPreset {
                display_name: "Resolve Actions",
                base_url: "https://help.resolve.io/actions/",
                versions: &["10-2", "10-1", "10-0"],
                default_version: "10-2",
                latest_version: "10-2",
            },
            Product::Pro => ProductPreset {
                display_name: "Resolve Pro",
                base_url: "https://help.resolve.io/pro/",
                versions: &["8-0", "7-9", "7-8"],
                default_version: "8-0",
                latest_version: "8-0",
            },
            Product::Express => ProductPreset {
                display_name: "Resolve Express",
                base_url: "https://docs.resolve.io/express/",
                versions: &["on-premise-2-5", "on-premise-2-4", "on-premise-2-1"],
                default_version: "on-premise-2-5",
                latest_version: "on-premise-2-5",
            },
        }
    }
}

impl FromStr for Product {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "actions" | "resolve-actions" => Ok(Product::Actions),
            "pro" | "resolve-pro" => Ok(Product::Pro),
            "express" | "resolve-express" => Ok(Product::Express),
            other => Err(RagError::BadInput(format!(
                "unknown product '{}': expected actions, pro, or express",
                other
            ))),
        }
    }
}

impl fmt::Display for Product {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

/// Resolved identity of the running product instance.
#[derive(Debug, Clone)]
pub struct ProductProfile {
    pub product: Product,
    pub display_name: String,
    base_url: Url,
    pub catalog: VersionCatalog,
}

impl ProductProfile {
    /// # Errors
    ///
    /// `BadInput` if `base_url` is not an absolute http(s) URL.
    pub fn new(
        product: Product,
        display_name: impl Into<String>,
        base_url: &str,
        catalog: VersionCatalog,
    ) -> Result<Self> {
        let mut url = Url::parse(base_url)
            .map_err(|e| RagError::BadInput(format!("invalid base_url '{}': {}", base_url, e)))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(RagError::BadInput(format!(
                "base_url must be http(s): {}",
                base_url
            )));
        }
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Ok(Self {
            product,
            display_name: display_name.into(),
            base_url: url,
            catalog,
        })
    }

    /// Profile built entirely from the product's preset.
    pub fn from_preset(product: Product) -> Self {
        let preset = product.preset();
        let versions: Vec<String> = preset.versions.iter().map(|v| v.to_string()).collect();
        let catalog =
            VersionCatalog::new(&versions, preset.default_version, preset.latest_version)
                .expect("product presets are valid catalogs");
        Self::new(product, preset.display_name, preset.base_url, catalog)
            .expect("product presets carry valid base URLs")
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    /// Turn a chunk's `source_url` into an absolute citation URL.
    ///
    /// Absolute URLs pass through; protocol-relative URLs get `https:`;
    /// relative paths are joined under the product base (without repeating
    /// the product segment). An empty URL cites the product base itself.
    pub fn complete_url(&self, raw: &str) -> String {
        let raw = raw.trim();
        if raw.is_empty() {
            return self.base_url.to_string();
        }
        if let Ok(parsed) = Url::parse(raw) {
            if parsed.scheme() == "http" || parsed.scheme() == "https" {
                return parsed.to_string();
            }
        }
        if let Some(rest) = raw.strip_prefix("//") {
            return format!("https://{}", rest);
        }

        let rel = raw.trim_start_matches("./").trim_start_matches('/');
        let base_rel = self.base_url.path().trim_start_matches('/');
        let joined = if !base_rel.is_empty() && rel.starts_with(base_rel) {
            self.base_url.join(&format!("/{}", rel))
        } else {
            self.base_url.join(rel)
        };
        match joined {
            Ok(url) => url.to_string(),
            Err(_) => format!("{}{}", self.base_url, rel),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_are_valid() {
        for p in [Product::Actions, Product::Pro, Product::Express] {
            let profile = ProductProfile::from_preset(p);
            assert!(profile.base_url().ends_with('/'));
            assert!(profile
                .catalog
                .is_supported(profile.catalog.default_version()));
        }
    }

    #[test]
    fn test_product_from_str() {
        assert_eq!("Pro".parse::<Product>().unwrap(), Product::Pro);
        assert_eq!("resolve-express".parse::<Product>().unwrap(), Product::Express);
        assert!("enterprise".parse::<Product>().is_err());
    }

    #[test]
    fn test_complete_absolute_passthrough() {
        let p = ProductProfile::from_preset(Product::Pro);
        assert_eq!(
            p.complete_url("https://help.resolve.io/pro/filters.htm"),
            "https://help.resolve.io/pro/filters.htm"
        );
    }

    #[test]
    fn test_complete_relative() {
        let p = ProductProfile::from_preset(Product::Pro);
        assert_eq!(
            p.complete_url("filters.htm"),
            "https://help.resolve.io/pro/filters.htm"
        );
        assert_eq!(
            p.complete_url("/content/filters.htm"),
            "https://help.resolve.io/pro/content/filters.htm"
        );
        assert_eq!(
            p.complete_url("/pro/filters.htm"),
            "https://help.resolve.io/pro/filters.htm"
        );
        assert_eq!(
            p.complete_url("//docs.resolve.io/pro/a.htm"),
            "https://docs.resolve.io/pro/a.htm"
        );
    }

    #[test]
    fn test_complete_empty_cites_base() {
        let p = ProductProfile::from_preset(Product::Express);
        assert_eq!(p.complete_url(""), "https://docs.resolve.io/express/");
    }

    #[test]
    fn test_base_url_without_trailing_slash() {
        let versions = vec!["8-0".to_string()];
        let cat = VersionCatalog::new(&versions, "8-0", "8-0").unwrap();
        let p = ProductProfile::new(Product::Pro, "Pro", "https://docs.resolve.io/pro", cat)
            .unwrap();
        assert_eq!(p.complete_url("a.htm"), "https://docs.resolve.io/pro/a.htm");
    }
}
