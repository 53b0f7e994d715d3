use {
    crate::{
        error::{FreezeError, Result},
        unit::UnitKind,
    },
    std::{
        collections::{HashMap, HashSet},
        fs::{self, File},
        io::Read,
        path::{Path, PathBuf},
    },
    tracing::{debug, warn},
    walkdir::WalkDir,
};

pub const SOURCE_SUFFIX: &str = "py";
pub const COMPILED_SUFFIX: &str = "pyc";
pub const PACKAGE_INIT: &str = "__init__";

/// Backing data of a located module.
#[derive(Debug)]
pub struct Located {
    pub bytes: Vec<u8>,
    pub origin: PathBuf,
    pub kind: UnitKind,
    pub in_archive: bool,
}

/// Precompiled members of one archive, keyed by dotted name.
#[derive(Debug, Default)]
struct ArchiveListing {
    members: HashMap<String, String>,
    packages: HashSet<String>,
}

/// Locates modules on the filesystem or inside archives found on the search
/// path.
///
/// Every archive is enumerated at most once per run; archives that fail to
/// read are remembered as unusable.
#[derive(Debug, Default)]
pub struct Backend {
    archives: HashMap<PathBuf, Option<ArchiveListing>>,
}

impl Backend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Find `name` (a single name segment) in the given locations, in order.
    pub fn find(&mut self, name: &str, path: &[PathBuf]) -> Result<Option<Located>> {
        for location in path {
            if let Some(found) = find_in_directory(name, location)? {
                return Ok(Some(found));
            }
        }
        for location in path {
            if let Some(found) = self.find_in_archive(name, location) {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    /// Names of the direct submodules found in the given package locations.
    ///
    /// Returned in location order, then name order. Names containing a dot
    /// cannot be imported and are skipped.
    pub fn submodules(&mut self, path: &[PathBuf]) -> Vec<String> {
        let mut names = Vec::new();
        for location in path {
            if location.is_dir() {
                names.extend(directory_submodules(location));
                continue;
            }
            let Some((root, prefix)) = archive_root(location) else {
                continue;
            };
            if let Some(listing) = self.listing(&root) {
                let base = dotted(&prefix, "");
                let mut found: Vec<String> = listing
                    .members
                    .keys()
                    .chain(listing.packages.iter())
                    .filter_map(|member| member.strip_prefix(&base))
                    .filter(|rest| !rest.contains('.') && *rest != PACKAGE_INIT)
                    .map(String::from)
                    .collect();
                found.sort();
                found.dedup();
                names.extend(found);
            }
        }
        names
    }

    fn find_in_archive(&mut self, name: &str, location: &Path) -> Option<Located> {
        let (root, prefix) = archive_root(location)?;
        let full_name = dotted(&prefix, name);

        let listing = self.listing(&root)?;
        if listing.packages.contains(&full_name) {
            return Some(Located {
                bytes: Vec::new(),
                origin: location.join(name),
                kind: UnitKind::PackageDirectory,
                in_archive: true,
            });
        }
        let member = listing.members.get(&full_name)?.clone();

        match read_member(&root, &member) {
            Ok(bytes) => Some(Located {
                bytes,
                origin: root.join(&member),
                kind: UnitKind::Precompiled,
                in_archive: true,
            }),
            Err(err) => {
                warn!(archive = %root.display(), %member, %err, "archive unusable, skipping");
                self.archives.insert(root, None);
                None
            }
        }
    }

    fn listing(&mut self, root: &Path) -> Option<&ArchiveListing> {
        if !self.archives.contains_key(root) {
            let listing = match enumerate_archive(root) {
                Ok(listing) => {
                    debug!(
                        archive = %root.display(),
                        members = listing.members.len(),
                        "enumerated archive"
                    );
                    Some(listing)
                }
                Err(err) => {
                    warn!(archive = %root.display(), %err, "archive unusable, skipping");
                    None
                }
            };
            self.archives.insert(root.to_path_buf(), listing);
        }
        self.archives.get(root).and_then(Option::as_ref)
    }
}

fn find_in_directory(name: &str, location: &Path) -> Result<Option<Located>> {
    let package_dir = location.join(name);
    if is_package_dir(&package_dir) {
        return Ok(Some(Located {
            bytes: Vec::new(),
            origin: package_dir,
            kind: UnitKind::PackageDirectory,
            in_archive: false,
        }));
    }

    for (suffix, kind) in [
        (SOURCE_SUFFIX, UnitKind::SourceText),
        (COMPILED_SUFFIX, UnitKind::Precompiled),
    ] {
        let file = location.join(format!("{name}.{suffix}"));
        if file.is_file() {
            let bytes = fs::read(&file).map_err(|e| FreezeError::io(&file, e))?;
            return Ok(Some(Located {
                bytes,
                origin: file,
                kind,
                in_archive: false,
            }));
        }
    }
    Ok(None)
}

fn is_package_dir(dir: &Path) -> bool {
    dir.is_dir()
        && [SOURCE_SUFFIX, COMPILED_SUFFIX]
            .iter()
            .any(|suffix| dir.join(format!("{PACKAGE_INIT}.{suffix}")).is_file())
}

fn directory_submodules(dir: &Path) -> Vec<String> {
    let mut names = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        let name = if entry.file_type().is_dir() {
            if !is_package_dir(path) {
                continue;
            }
            entry.file_name().to_string_lossy().to_string()
        } else {
            let is_module = path
                .extension()
                .is_some_and(|ext| ext == SOURCE_SUFFIX || ext == COMPILED_SUFFIX);
            if !is_module {
                continue;
            }
            match path.file_stem() {
                Some(stem) => stem.to_string_lossy().to_string(),
                None => continue,
            }
        };
        if name == PACKAGE_INIT || name.contains('.') || names.contains(&name) {
            continue;
        }
        names.push(name);
    }
    names
}

/// Split a location into the archive file containing it and the slash
/// separated prefix inside that archive.
fn archive_root(location: &Path) -> Option<(PathBuf, String)> {
    location
        .ancestors()
        .find(|ancestor| ancestor.is_file())
        .map(|root| {
            let prefix = location
                .strip_prefix(root)
                .map(|rest| {
                    rest.components()
                        .map(|c| c.as_os_str().to_string_lossy().to_string())
                        .collect::<Vec<_>>()
                        .join("/")
                })
                .unwrap_or_default();
            (root.to_path_buf(), prefix)
        })
}

fn dotted(prefix: &str, name: &str) -> String {
    let mut parts: Vec<&str> = prefix.split('/').filter(|s| !s.is_empty()).collect();
    if name.is_empty() {
        let mut base = parts.join(".");
        if !base.is_empty() {
            base.push('.');
        }
        return base;
    }
    parts.push(name);
    parts.join(".")
}

fn enumerate_archive(root: &Path) -> zip::result::ZipResult<ArchiveListing> {
    let mut archive = zip::ZipArchive::new(File::open(root)?)?;
    let mut listing = ArchiveListing::default();
    for idx in 0..archive.len() {
        let entry = archive.by_index(idx)?;
        let Some(base) = entry
            .name()
            .strip_suffix(&format!(".{COMPILED_SUFFIX}"))
            .map(String::from)
        else {
            continue;
        };
        let module_name = base.replace('/', ".");
        if let Some(package) = module_name.strip_suffix(&format!(".{PACKAGE_INIT}")) {
            listing.packages.insert(package.to_string());
        }
        listing
            .members
            .entry(module_name)
            .or_insert_with(|| entry.name().to_string());
    }
    Ok(listing)
}

fn read_member(root: &Path, member: &str) -> zip::result::ZipResult<Vec<u8>> {
    let mut archive = zip::ZipArchive::new(File::open(root)?)?;
    let mut entry = archive.by_name(member)?;
    let mut bytes = Vec::new();
    entry.read_to_end(&mut bytes)?;
    Ok(bytes)
}
