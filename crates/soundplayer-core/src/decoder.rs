//! Audio decoding via Symphonia
//!
//! Decodes local files or in-memory bodies into interleaved f32 PCM.

use std::fs::File;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{ Decoder, DecoderOptions, CODEC_TYPE_NULL };
use symphonia::core::formats::{ FormatOptions, FormatReader, SeekMode, SeekTo };
use symphonia::core::io::{ MediaSource, MediaSourceStream, MediaSourceStreamOptions };
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;
use thiserror::Error;


#[derive( Debug, Error )]
pub enum DecodeError {
    #[error( "Failed to open file: {0}" )]
    FileOpen( #[from] std::io::Error ),

    #[error( "Unsupported format" )]
    UnsupportedFormat,

    #[error( "No audio tracks found" )]
    NoAudioTrack,

    #[error( "Decoder creation failed: {0}" )]
    DecoderCreation( String ),

    #[error( "Decode error: {0}" )]
    Decode( String ),

    #[error( "Seek error: {0}" )]
    Seek( String ),
}


/// Shared read-only bytes usable as a symphonia media source.
#[derive( Clone )]
struct SharedBytes( Arc<Vec<u8>> );


impl AsRef<[u8]> for SharedBytes {
    fn as_ref( &self ) -> &[u8] {
        &self.0
    }
}


/// Audio decoder wrapper around Symphonia.
pub struct AudioDecoder {
    format_reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    channels: usize,
    sample_buf: Option<SampleBuffer<f32>>,
    duration: Option<f64>,
}


impl AudioDecoder {
    /// Opens an audio file for decoding.
    pub fn open( path: &Path ) -> Result<Self, DecodeError> {
        let file = File::open( path )?;
        let extension = path.extension().and_then( |e| e.to_str() );
        Self::from_source( Box::new( file ), extension, 64 * 1024 )
    }


    /// Decodes an in-memory body, e.g. a downloaded URL.
    pub fn from_bytes( bytes: Arc<Vec<u8>>, extension: Option<&str> ) -> Result<Self, DecodeError> {
        let cursor = Cursor::new( SharedBytes( bytes ) );
        Self::from_source( Box::new( cursor ), extension, 64 * 1024 )
    }


    fn from_source(
        source: Box<dyn MediaSource>,
        extension: Option<&str>,
        buffer_len: usize,
    ) -> Result<Self, DecodeError> {
        let mss = MediaSourceStream::new( source, MediaSourceStreamOptions { buffer_len } );

        let mut hint = Hint::new();
        if let Some( ext ) = extension {
            hint.with_extension( ext );
        }

        let probed = symphonia::default::get_probe()
            .format( &hint, mss, &FormatOptions::default(), &MetadataOptions::default() )
            .map_err( |_| DecodeError::UnsupportedFormat )?;
        let format_reader = probed.format;

        let track = format_reader
            .tracks()
            .iter()
            .find( |t| t.codec_params.codec != CODEC_TYPE_NULL )
            .ok_or( DecodeError::NoAudioTrack )?;

        let track_id = track.id;
        let codec_params = &track.codec_params;

        let sample_rate = codec_params.sample_rate.unwrap_or( 44100 );
        let channels = codec_params.channels.map( |c| c.count() ).unwrap_or( 2 );
        let duration = codec_params.n_frames.map( |frames| frames as f64 / sample_rate as f64 );

        tracing::debug!(
            "Opened audio: {} Hz, {} channels, duration: {:?}s",
            sample_rate,
            channels,
            duration
        );

        let decoder = symphonia::default::get_codecs()
            .make( codec_params, &DecoderOptions::default() )
            .map_err( |e| DecodeError::DecoderCreation( e.to_string() ) )?;

        Ok( Self {
            format_reader,
            decoder,
            track_id,
            sample_rate,
            channels,
            sample_buf: None,
            duration,
        })
    }


    pub fn sample_rate( &self ) -> u32 {
        self.sample_rate
    }


    pub fn channels( &self ) -> usize {
        self.channels
    }


    /// Duration in seconds, if the container declares it.
    pub fn duration( &self ) -> Option<f64> {
        self.duration
    }


    /// Decodes the next packet and returns interleaved f32 samples.
    ///
    /// Returns None when EOF is reached.
    pub fn decode_next( &mut self ) -> Result<Option<Vec<f32>>, DecodeError> {
        loop {
            let packet = match self.format_reader.next_packet() {
                Ok( packet ) => packet,
                Err( symphonia::core::errors::Error::IoError( ref e ) )
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok( None );
                }
                Err( e ) => return Err( DecodeError::Decode( e.to_string() ) ),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode( &packet ) {
                Ok( decoded ) => decoded,
                // Corrupt packets are skipped
                Err( symphonia::core::errors::Error::DecodeError( _ ) ) => continue,
                Err( e ) => return Err( DecodeError::Decode( e.to_string() ) ),
            };

            let spec = *decoded.spec();
            let num_frames = decoded.frames();

            if self.sample_buf.as_ref().map_or( true, |buf| buf.capacity() < num_frames ) {
                self.sample_buf = Some( SampleBuffer::new( num_frames as u64, spec ) );
            }
            let Some( sample_buf ) = self.sample_buf.as_mut() else {
                continue;
            };
            sample_buf.copy_interleaved_ref( decoded );

            return Ok( Some( sample_buf.samples().to_vec() ) );
        }
    }


    /// Seeks to a position in seconds.
    pub fn seek( &mut self, position_secs: f64 ) -> Result<(), DecodeError> {
        let seek_to = SeekTo::Time {
            time: Time::from( position_secs ),
            track_id: Some( self.track_id ),
        };

        self.format_reader
            .seek( SeekMode::Accurate, seek_to )
            .map_err( |e| DecodeError::Seek( e.to_string() ) )?;

        self.decoder.reset();
        Ok(())
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use crate::testing::wav_bytes;


    #[test]
    fn test_decodes_wav_from_memory() {
        let bytes = Arc::new( wav_bytes( 8000, &[ 0; 8000 ] ) );
        let mut decoder = AudioDecoder::from_bytes( bytes, Some( "wav" ) ).unwrap();

        assert_eq!( decoder.sample_rate(), 8000 );
        assert_eq!( decoder.channels(), 1 );
        assert_eq!( decoder.duration(), Some( 1.0 ) );

        let mut total = 0;
        while let Some( samples ) = decoder.decode_next().unwrap() {
            total += samples.len();
        }
        assert_eq!( total, 8000 );
    }


    #[test]
    fn test_rejects_garbage() {
        let bytes = Arc::new( b"definitely not audio".to_vec() );
        assert!( matches!(
            AudioDecoder::from_bytes( bytes, None ),
            Err( DecodeError::UnsupportedFormat )
        ));
    }
}
