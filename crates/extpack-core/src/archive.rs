#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveType {
    Jar,
    Zip,
    Xar,
    TarGz,
    TarZst,
    Bin,
}

impl ArchiveType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Jar => "jar",
            Self::Zip => "zip",
            Self::Xar => "xar",
            Self::TarGz => "tar.gz",
            Self::TarZst => "tar.zst",
            Self::Bin => "bin",
        }
    }

    /// Container formats whose entries can be listed from the raw byte
    /// stream. `Bin` artifacts are opaque single files.
    pub fn is_archive(self) -> bool {
        !matches!(self, Self::Bin)
    }

    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "jar" => Some(Self::Jar),
            "zip" => Some(Self::Zip),
            "xar" => Some(Self::Xar),
            "tar.gz" | "tgz" => Some(Self::TarGz),
            "tar.zst" | "tzst" => Some(Self::TarZst),
            "bin" => Some(Self::Bin),
            _ => None,
        }
    }

    pub fn infer_from_url(url: &str) -> Option<Self> {
        let lower = url.to_ascii_lowercase();
        let without_fragment = lower.split('#').next().unwrap_or(&lower);
        let without_query = without_fragment
            .split('?')
            .next()
            .unwrap_or(without_fragment);

        for (suffix, archive_type) in [
            (".jar", Self::Jar),
            (".zip", Self::Zip),
            (".xar", Self::Xar),
            (".tar.gz", Self::TarGz),
            (".tgz", Self::TarGz),
            (".tar.zst", Self::TarZst),
            (".tzst", Self::TarZst),
            (".bin", Self::Bin),
        ] {
            if without_query.ends_with(suffix) {
                return Some(archive_type);
            }
        }

        let file_name = without_query.rsplit('/').next().unwrap_or("");
        if !file_name.is_empty() && !file_name.contains('.') {
            return Some(Self::Bin);
        }

        None
    }
}
