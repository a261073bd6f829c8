use blockstack_api::config::DesiredVolume;
use devgraph::FormatSpec;

/// Build the format a volume asks for. An empty file system type asks for an
/// unformatted device.
pub fn format_spec(volume: &DesiredVolume) -> FormatSpec {
    let spec = match volume.fs_type.trim() {
        "" => FormatSpec::default(),
        fs_type => FormatSpec::filesystem(fs_type),
    };

    spec.with_label(non_empty(&volume.fs_label))
        .with_create_options(non_empty(&volume.fs_create_options))
        .with_mount_point(volume.mount_point.clone())
}

fn non_empty(value: &str) -> Option<String> {
    Some(value.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn test_format_spec() {
        let mut volume = DesiredVolume::new("data");
        volume.fs_type = "ext4".into();
        volume.fs_label = "DATA".into();
        volume.mount_point = Some(PathBuf::from("/data"));

        let spec = format_spec(&volume);
        assert_eq!(spec.fs_type.as_deref(), Some("ext4"));
        assert_eq!(spec.label.as_deref(), Some("DATA"));
        assert_eq!(spec.create_options, None);
        assert_eq!(spec.mount_point, Some(PathBuf::from("/data")));
    }

    #[test]
    fn test_format_spec_defaults() {
        let spec = format_spec(&DesiredVolume::new("data"));
        assert_eq!(spec.fs_type.as_deref(), Some("xfs"));
        assert_eq!(spec.label, None);

        let mut volume = DesiredVolume::new("raw");
        volume.fs_type = String::new();
        volume.fs_create_options = " -m 0 ".into();
        let spec = format_spec(&volume);
        assert_eq!(spec.fs_type, None);
        assert_eq!(spec.create_options.as_deref(), Some("-m 0"));
    }
}
