//! Source resolution
//!
//! Turns a (name, type) pair or a URL into a `Locator` a decoder can bind to.
//! Resolution never fails: a locator that points nowhere is only discovered
//! when the decoder tries to prepare it.

use std::fmt;
use std::fs;
use std::num::NonZeroU32;
use std::path::{ Path, PathBuf };


/// Resource class searched for bundled sounds.
pub const RAW_CLASS: &str = "raw";


/// Where a session's media came from, kept for diagnostics and events.
#[derive( Debug, Clone, PartialEq, Eq )]
pub enum SourceDescriptor {
    BundledResource { name: String },
    LocalFile { name: String, kind: String },
    RemoteUrl { url: String },
}


impl fmt::Display for SourceDescriptor {
    fn fmt( &self, f: &mut fmt::Formatter<'_> ) -> fmt::Result {
        match self {
            SourceDescriptor::BundledResource { name } => write!( f, "resource {}", name ),
            SourceDescriptor::LocalFile { name, kind } if kind.is_empty() => write!( f, "file {}", name ),
            SourceDescriptor::LocalFile { name, kind } => write!( f, "file {}.{}", name, kind ),
            SourceDescriptor::RemoteUrl { url } => write!( f, "url {}", url ),
        }
    }
}


/// A dereferenceable reference to media content.
#[derive( Debug, Clone, PartialEq, Eq )]
pub enum Locator {
    /// A compiled-in resource, addressed by namespace and name.
    Bundled { package: String, name: String, path: PathBuf },
    /// A file in the application's private storage.
    File { path: PathBuf },
    /// A URL handed over verbatim.
    Url { url: String },
}


impl Locator {
    /// Returns true when the decoder prepares this locator asynchronously.
    pub fn is_remote( &self ) -> bool {
        matches!( self, Locator::Url { .. } )
    }


    /// Local filesystem path backing this locator, if any.
    pub fn local_path( &self ) -> Option<&Path> {
        match self {
            Locator::Bundled { path, .. } | Locator::File { path } => Some( path ),
            Locator::Url { .. } => None,
        }
    }
}


impl fmt::Display for Locator {
    fn fmt( &self, f: &mut fmt::Formatter<'_> ) -> fmt::Result {
        match self {
            Locator::Bundled { package, name, .. } => write!( f, "resource://{}/{}/{}", package, RAW_CLASS, name ),
            Locator::File { path } => write!( f, "file://{}", path.display() ),
            Locator::Url { url } => f.write_str( url ),
        }
    }
}


/// Output of a resolution: what to bind and what to report.
#[derive( Debug, Clone, PartialEq, Eq )]
pub struct Resolved {
    pub locator: Locator,
    pub source: SourceDescriptor,
}


/// A compiled-in resource found by a catalog lookup.
#[derive( Debug, Clone, PartialEq, Eq )]
pub struct ResourceEntry {
    pub id: NonZeroU32,
    pub path: PathBuf,
}


/// Lookup of bundled resources by name, class and package namespace.
pub trait ResourceCatalog: Send {
    fn lookup( &self, name: &str, class: &str, package: &str ) -> Option<ResourceEntry>;
}


/// Catalog backed by a directory tree laid out as `<root>/<class>/<name>.<ext>`.
///
/// Identifiers are 1-based positions of the entries in sorted order.
#[derive( Debug, Clone )]
pub struct DirectoryCatalog {
    root: PathBuf,
    package: String,
}


impl DirectoryCatalog {
    pub fn new( root: impl Into<PathBuf>, package: impl Into<String> ) -> Self {
        Self { root: root.into(), package: package.into() }
    }


    pub fn root( &self ) -> &Path {
        &self.root
    }
}


impl ResourceCatalog for DirectoryCatalog {
    fn lookup( &self, name: &str, class: &str, package: &str ) -> Option<ResourceEntry> {
        if package != self.package || name.is_empty() {
            return None;
        }

        let entries = match fs::read_dir( self.root.join( class ) ) {
            Ok( entries ) => entries,
            Err( e ) => {
                tracing::debug!( "Resource class {:?} unavailable under {:?}: {}", class, self.root, e );
                return None;
            }
        };

        let mut files: Vec<PathBuf> = entries
            .flatten()
            .map( |entry| entry.path() )
            .filter( |path| path.is_file() )
            .collect();
        files.sort();

        files.into_iter()
            .enumerate()
            .find( |( _, path )| path.file_stem().and_then( |s| s.to_str() ) == Some( name ) )
            .and_then( |( index, path )| {
                let id = NonZeroU32::new( u32::try_from( index + 1 ).ok()? )?;
                Some( ResourceEntry { id, path } )
            })
    }
}


/// Resolves sound names and URLs to locators.
pub struct SourceResolver {
    catalog: Box<dyn ResourceCatalog>,
    package: String,
    storage_dir: PathBuf,
}


impl SourceResolver {
    /// Creates a resolver looking up bundled sounds in `catalog` under `package`
    /// and falling back to files in `storage_dir`.
    pub fn new(
        catalog: Box<dyn ResourceCatalog>,
        package: impl Into<String>,
        storage_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            catalog,
            package: package.into(),
            storage_dir: storage_dir.into(),
        }
    }


    pub fn storage_dir( &self ) -> &Path {
        &self.storage_dir
    }


    /// Resolves a named sound: bundled resource first, then private storage.
    pub fn resolve_file( &self, name: &str, kind: &str ) -> Resolved {
        if let Some( entry ) = self.catalog.lookup( name, RAW_CLASS, &self.package ) {
            tracing::debug!( "Resolved {:?} to bundled resource #{}", name, entry.id );
            return Resolved {
                locator: Locator::Bundled {
                    package: self.package.clone(),
                    name: name.to_string(),
                    path: entry.path,
                },
                source: SourceDescriptor::BundledResource { name: name.to_string() },
            };
        }

        let path = self.storage_path( name, kind );
        if path.exists() {
            make_world_readable( &path );
        }

        tracing::debug!( "Resolved {:?} to {:?}", name, path );
        Resolved {
            locator: Locator::File { path },
            source: SourceDescriptor::LocalFile { name: name.to_string(), kind: kind.to_string() },
        }
    }


    /// Resolves a URL. The string is used verbatim.
    pub fn resolve_url( &self, url: &str ) -> Resolved {
        Resolved {
            locator: Locator::Url { url: url.to_string() },
            source: SourceDescriptor::RemoteUrl { url: url.to_string() },
        }
    }


    /// `{storage_dir}/{name}.{kind}`, without the suffix when `kind` is empty.
    fn storage_path( &self, name: &str, kind: &str ) -> PathBuf {
        let mut path = self.storage_dir.clone().into_os_string();
        path.push( "/" );
        path.push( name );
        if !kind.is_empty() {
            path.push( "." );
            path.push( kind );
        }
        PathBuf::from( path )
    }
}


/// Some decoders refuse to prepare files they cannot read with an opaque status code.
#[cfg( unix )]
fn make_world_readable( path: &Path ) {
    use std::os::unix::fs::PermissionsExt;

    let result = fs::metadata( path ).and_then( |meta| {
        let mut permissions = meta.permissions();
        permissions.set_mode( permissions.mode() | 0o444 );
        fs::set_permissions( path, permissions )
    });

    if let Err( e ) = result {
        tracing::warn!( "Failed to mark {:?} readable: {}", path, e );
    }
}


#[cfg( not( unix ) )]
fn make_world_readable( _path: &Path ) {}


/// Default application-private storage directory.
pub fn default_storage_dir() -> Option<PathBuf> {
    dirs::data_local_dir().map( |d| d.join( "soundplayer" ).join( "files" ) )
}


/// Default root for bundled resources.
pub fn default_resource_dir() -> Option<PathBuf> {
    dirs::data_local_dir().map( |d| d.join( "soundplayer" ).join( "res" ) )
}


#[cfg( test )]
mod tests {
    use super::*;
    use crate::testing::touch;
    use tempfile::TempDir;


    fn resolver( scratch: &TempDir ) -> SourceResolver {
        let catalog = DirectoryCatalog::new( scratch.path().join( "res" ), "com.test.app" );
        SourceResolver::new( Box::new( catalog ), "com.test.app", scratch.path().join( "files" ) )
    }


    #[test]
    fn test_bundled_resource_wins() {
        let scratch = tempfile::tempdir().unwrap();
        touch( scratch.path(), "res/raw/beep.mp3" );
        touch( scratch.path(), "files/beep.mp3" );

        let resolved = resolver( &scratch ).resolve_file( "beep", "mp3" );
        match resolved.locator {
            Locator::Bundled { ref package, ref name, ref path } => {
                assert_eq!( package, "com.test.app" );
                assert_eq!( name, "beep" );
                assert!( path.ends_with( "res/raw/beep.mp3" ) );
            }
            ref other => panic!( "expected bundled locator, got {:?}", other ),
        }
        assert_eq!( resolved.source, SourceDescriptor::BundledResource { name: "beep".into() } );
        assert_eq!( resolved.locator.to_string(), "resource://com.test.app/raw/beep" );
    }


    #[test]
    fn test_missing_sound_falls_through_to_storage() {
        let scratch = tempfile::tempdir().unwrap();

        let resolved = resolver( &scratch ).resolve_file( "missing", "mp3" );
        assert_eq!(
            resolved.locator,
            Locator::File { path: scratch.path().join( "files" ).join( "missing.mp3" ) }
        );
        assert!( !resolved.locator.is_remote() );
    }


    #[test]
    fn test_empty_type_omits_suffix() {
        let scratch = tempfile::tempdir().unwrap();

        let resolved = resolver( &scratch ).resolve_file( "clip", "" );
        let path = resolved.locator.local_path().unwrap().to_path_buf();
        assert_eq!( path, scratch.path().join( "files" ).join( "clip" ) );
        assert_eq!( resolved.source.to_string(), "file clip" );
    }


    #[cfg( unix )]
    #[test]
    fn test_existing_file_made_world_readable() {
        use std::os::unix::fs::PermissionsExt;

        let scratch = tempfile::tempdir().unwrap();
        let file = touch( scratch.path(), "files/voice.ogg" );
        fs::set_permissions( &file, fs::Permissions::from_mode( 0o600 ) ).unwrap();

        resolver( &scratch ).resolve_file( "voice", "ogg" );

        let mode = fs::metadata( &file ).unwrap().permissions().mode();
        assert_eq!( mode & 0o444, 0o444 );
    }


    #[test]
    fn test_url_used_verbatim() {
        let scratch = tempfile::tempdir().unwrap();

        let resolved = resolver( &scratch ).resolve_url( "not a url at all" );
        assert_eq!( resolved.locator, Locator::Url { url: "not a url at all".into() } );
        assert!( resolved.locator.is_remote() );
        assert_eq!( resolved.locator.to_string(), "not a url at all" );
    }


    #[test]
    fn test_catalog_ids_and_namespace() {
        let scratch = tempfile::tempdir().unwrap();
        touch( scratch.path(), "res/raw/alpha.wav" );
        touch( scratch.path(), "res/raw/beep.mp3" );

        let catalog = DirectoryCatalog::new( scratch.path().join( "res" ), "com.test.app" );
        let entry = catalog.lookup( "beep", RAW_CLASS, "com.test.app" ).unwrap();
        assert_eq!( entry.id.get(), 2 );

        assert!( catalog.lookup( "beep", RAW_CLASS, "com.other.app" ).is_none() );
        assert!( catalog.lookup( "beep", "drawable", "com.test.app" ).is_none() );
        assert!( catalog.lookup( "nope", RAW_CLASS, "com.test.app" ).is_none() );
    }
}
