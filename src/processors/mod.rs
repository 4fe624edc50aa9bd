//! Document loaders and serializers

pub mod html;
