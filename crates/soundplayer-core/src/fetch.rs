//! Remote media download
//!
//! Remote sources are fetched whole into memory before decoding. Sounds
//! played through the manager are short, so there is no streaming path.

use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;


/// Largest body accepted from a remote source.
pub const MAX_REMOTE_BYTES: u64 = 64 * 1024 * 1024;


#[derive( Debug, Error )]
pub enum FetchError {
    #[error( "Unsupported URL: {0}" )]
    UnsupportedScheme( String ),

    #[error( "HTTP {status} fetching {url}" )]
    Status { url: String, status: u16 },

    #[error( "Request failed: {0}" )]
    Transport( String ),

    #[error( "Body exceeds {limit} bytes" )]
    TooLarge { limit: u64 },

    #[error( "Read failed: {0}" )]
    Io( #[from] std::io::Error ),
}


/// Where a URL's bytes come from.
#[derive( Debug, Clone, PartialEq, Eq )]
pub enum RemoteTarget {
    Http( String ),
    LocalFile( PathBuf ),
}


/// Classifies a URL by scheme.
pub fn classify( url: &str ) -> Result<RemoteTarget, FetchError> {
    let lower = url.to_ascii_lowercase();
    if lower.starts_with( "http://" ) || lower.starts_with( "https://" ) {
        Ok( RemoteTarget::Http( url.to_string() ) )
    } else if lower.starts_with( "file://" ) {
        Ok( RemoteTarget::LocalFile( PathBuf::from( &url[ "file://".len().. ] ) ) )
    } else {
        Err( FetchError::UnsupportedScheme( url.to_string() ) )
    }
}


fn http_agent() -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout_connect( Duration::from_secs( 15 ) )
        .timeout_read( Duration::from_secs( 30 ) )
        .user_agent( concat!( "soundplayer/", env!( "CARGO_PKG_VERSION" ) ) )
        .redirects( 5 )
        .build()
}


/// Downloads the body of `url` into memory.
pub fn fetch_bytes( url: &str ) -> Result<Vec<u8>, FetchError> {
    tracing::info!( "Fetching {}", url );

    let response = match http_agent().get( url ).call() {
        Ok( response ) => response,
        Err( ureq::Error::Status( status, _ ) ) => {
            return Err( FetchError::Status { url: url.to_string(), status } );
        }
        Err( e ) => return Err( FetchError::Transport( e.to_string() ) ),
    };

    let declared = response
        .header( "Content-Length" )
        .and_then( |s| s.parse::<u64>().ok() );
    if declared.is_some_and( |len| len > MAX_REMOTE_BYTES ) {
        return Err( FetchError::TooLarge { limit: MAX_REMOTE_BYTES } );
    }

    let mut body = Vec::with_capacity( declared.unwrap_or( 0 ).min( MAX_REMOTE_BYTES ) as usize );
    response
        .into_reader()
        .take( MAX_REMOTE_BYTES + 1 )
        .read_to_end( &mut body )?;

    if body.len() as u64 > MAX_REMOTE_BYTES {
        return Err( FetchError::TooLarge { limit: MAX_REMOTE_BYTES } );
    }

    tracing::debug!( "Fetched {} bytes from {}", body.len(), url );
    Ok( body )
}


/// File extension of the URL's path, used as a format hint.
pub fn extension_hint( url: &str ) -> Option<String> {
    let path = url
        .split( [ '?', '#' ] )
        .next()
        .unwrap_or( url );
    let last = path.rsplit( '/' ).next()?;
    let ( stem, ext ) = last.rsplit_once( '.' )?;
    if stem.is_empty() || ext.is_empty() || ext.len() > 5 {
        return None;
    }
    Some( ext.to_ascii_lowercase() )
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_classify_schemes() {
        assert_eq!(
            classify( "https://example.com/a.mp3" ).unwrap(),
            RemoteTarget::Http( "https://example.com/a.mp3".into() )
        );
        assert_eq!(
            classify( "file:///tmp/a.wav" ).unwrap(),
            RemoteTarget::LocalFile( PathBuf::from( "/tmp/a.wav" ) )
        );
        assert!( matches!( classify( "not a url" ), Err( FetchError::UnsupportedScheme( _ ) ) ) );
    }


    #[test]
    fn test_extension_hint() {
        assert_eq!( extension_hint( "https://example.com/song.MP3?x=1" ).as_deref(), Some( "mp3" ) );
        assert_eq!( extension_hint( "https://example.com/stream" ), None );
        assert_eq!( extension_hint( "https://example.com/.hidden" ), None );
        assert_eq!( extension_hint( "file:///tmp/clip.ogg#t=3" ).as_deref(), Some( "ogg" ) );
    }
}
