use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// File storage buckets used by the back office.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBucket {
    /// Product imagery.
    Products,
    /// Admin avatars.
    Avatars,
    /// Admin signatures used on approvals.
    Signatures,
    /// Uploaded documents.
    Documents,
    /// Legacy admin profile images.
    AdminProfiles,
}

impl StorageBucket {
    /// Returns the remote bucket name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Products => "products",
            Self::Avatars => "avatars",
            Self::Signatures => "signatures",
            Self::Documents => "documents",
            Self::AdminProfiles => "admin_profiles",
        }
    }
}

impl Display for StorageBucket {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Which admin image an upload replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileImageKind {
    /// Avatar picture.
    Avatar,
    /// Handwritten signature.
    Signature,
}

impl ProfileImageKind {
    /// Returns the bucket images of this kind are stored in.
    #[must_use]
    pub fn bucket(&self) -> StorageBucket {
        match self {
            Self::Avatar => StorageBucket::Avatars,
            Self::Signature => StorageBucket::Signatures,
        }
    }
}

/// Builds the object path for an upload.
///
/// `timestamp_millis` keeps image paths unique per upload so CDN caches never
/// serve a replaced image.
#[must_use]
pub fn generate_file_path(
    bucket: StorageBucket,
    file_name: &str,
    identifier: &str,
    timestamp_millis: i64,
) -> String {
    let extension = file_name
        .rsplit_once('.')
        .map_or(file_name, |(_, extension)| extension);

    match bucket {
        StorageBucket::AdminProfiles => {
            format!("{identifier}/profile_{timestamp_millis}.{extension}")
        }
        StorageBucket::Avatars => format!("{identifier}/avatar_{timestamp_millis}.{extension}"),
        StorageBucket::Signatures => {
            format!("{identifier}/signature_{timestamp_millis}.{extension}")
        }
        StorageBucket::Products => format!("{identifier}/{}", sanitize_file_name(file_name)),
        StorageBucket::Documents => format!("{identifier}/docs/{}", sanitize_file_name(file_name)),
    }
}

/// Returns the path prefix under which all images of one admin live.
#[must_use]
pub fn profile_image_prefix(identifier: &str) -> String {
    format!("{identifier}/")
}

fn sanitize_file_name(file_name: &str) -> String {
    file_name
        .to_lowercase()
        .chars()
        .map(|character| {
            if character.is_ascii_lowercase() || character.is_ascii_digit() || character == '.' {
                character
            } else {
                '-'
            }
        })
        .collect()
}
