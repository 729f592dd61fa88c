use crate::models::{CreatorProfile, CreatorProfileRequest};

pub const MIN_DISPLAY_NAME_LEN: usize = 2;
pub const MAX_DISPLAY_NAME_LEN: usize = 50;
pub const MAX_DESCRIPTION_LEN: usize = 500;
pub const MAX_IMAGE_URL_LEN: usize = 2048;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProfileError {
    #[error("Name must be between 2 and 50 characters")]
    DisplayNameLength,
    #[error("Name can only contain letters, numbers, spaces, dots, dashes, and underscores")]
    DisplayNameCharacters,
    #[error("Description must be less than 500 characters")]
    DescriptionLength,
    #[error("Image URL must be an http(s) URL: {0}")]
    ImageUrl(String),
}

pub fn canonicalize_profile(request: &CreatorProfileRequest) -> Result<CreatorProfile, ProfileError> {
    Ok(CreatorProfile {
        display_name: canonicalize_display_name(&request.display_name)?,
        description: canonicalize_description(&request.description)?,
        image_url: canonicalize_image_url(&request.image_url)?,
    })
}

pub fn canonicalize_display_name(value: &str) -> Result<String, ProfileError> {
    let trimmed = value.trim();
    let length = trimmed.chars().count();
    if !(MIN_DISPLAY_NAME_LEN..=MAX_DISPLAY_NAME_LEN).contains(&length) {
        return Err(ProfileError::DisplayNameLength);
    }
    let allowed = |c: char| c.is_ascii_alphanumeric() || c.is_whitespace() || matches!(c, '.' | '_' | '-');
    if !trimmed.chars().all(allowed) {
        return Err(ProfileError::DisplayNameCharacters);
    }
    Ok(trimmed.to_string())
}

pub fn canonicalize_description(value: &str) -> Result<String, ProfileError> {
    let trimmed = value.trim();
    if trimmed.chars().count() > MAX_DESCRIPTION_LEN {
        return Err(ProfileError::DescriptionLength);
    }
    Ok(trimmed.to_string())
}

/// Empty is allowed; the asset host hands back absolute http(s) URLs.
pub fn canonicalize_image_url(value: &str) -> Result<String, ProfileError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(String::new());
    }
    if trimmed.len() > MAX_IMAGE_URL_LEN {
        return Err(ProfileError::ImageUrl("URL too long".to_string()));
    }
    let rest = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .ok_or_else(|| ProfileError::ImageUrl(trimmed.to_string()))?;
    let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
    if host.is_empty() || trimmed.chars().any(char::is_whitespace) {
        return Err(ProfileError::ImageUrl(trimmed.to_string()));
    }
    Ok(trimmed.to_string())
}
