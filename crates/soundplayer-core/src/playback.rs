//! Desktop decoder backend
//!
//! `SymphoniaDecoder` implements `MediaDecoder` with Symphonia for decoding,
//! rubato for rate conversion and one cpal stream per playing session.
//! Remote URLs are downloaded whole during prepare.

use std::path::PathBuf;
use std::sync::atomic::{ AtomicBool, AtomicU64, Ordering };
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cpal::traits::HostTrait;
use parking_lot::Mutex;
use rubato::{ FastFixedOut, PolynomialDegree, Resampler };

use crate::decoder::{ AudioDecoder, DecodeError };
use crate::fetch::{ self, RemoteTarget };
use crate::locator::Locator;
use crate::media::{ CompletionCallback, DecoderBackend, DecoderError, MediaDecoder, PreparedCallback };
use crate::output::{ AudioOutput, SampleBuffer };


/// Creates Symphonia decoders, or none when there is no output device.
#[derive( Debug, Default )]
pub struct SymphoniaBackend;


impl SymphoniaBackend {
    pub fn new() -> Self {
        Self
    }
}


impl DecoderBackend for SymphoniaBackend {
    fn create( &mut self ) -> Option<Box<dyn MediaDecoder>> {
        if cpal::default_host().default_output_device().is_none() {
            tracing::warn!( "No audio output device available" );
            return None;
        }
        Some( Box::new( SymphoniaDecoder::new() ) )
    }
}


/// Where decodable bytes live.
#[derive( Clone )]
enum MediaBody {
    File( PathBuf ),
    Memory { bytes: Arc<Vec<u8>>, extension: Option<String> },
}


impl MediaBody {
    fn open( &self ) -> Result<AudioDecoder, DecodeError> {
        match self {
            MediaBody::File( path ) => AudioDecoder::open( path ),
            MediaBody::Memory { bytes, extension } => {
                AudioDecoder::from_bytes( Arc::clone( bytes ), extension.as_deref() )
            }
        }
    }
}


/// Media that probed successfully.
#[derive( Clone )]
struct PreparedMedia {
    body: MediaBody,
    duration_ms: Option<u64>,
}


/// Prepared media for the current bind. `generation` changes on every reset
/// so a background prepare for an older bind cannot install its result.
#[derive( Default )]
struct MediaSlot {
    generation: u64,
    media: Option<PreparedMedia>,
}


/// Fetches (if remote) and probes the media behind `locator`.
fn load_media( locator: &Locator ) -> Result<PreparedMedia, DecoderError> {
    let body = match locator {
        Locator::Bundled { path, .. } | Locator::File { path } => MediaBody::File( path.clone() ),
        Locator::Url { url } => match fetch::classify( url ) {
            Ok( RemoteTarget::LocalFile( path ) ) => MediaBody::File( path ),
            Ok( RemoteTarget::Http( url ) ) => {
                let bytes = fetch::fetch_bytes( &url ).map_err( |e| DecoderError::Prepare( e.to_string() ) )?;
                MediaBody::Memory {
                    bytes: Arc::new( bytes ),
                    extension: fetch::extension_hint( &url ),
                }
            }
            Err( e ) => return Err( DecoderError::Prepare( e.to_string() ) ),
        },
    };

    let decoder = body.open().map_err( |e| DecoderError::Prepare( e.to_string() ) )?;
    let duration_ms = decoder.duration().map( |secs| ( secs * 1000.0 ).round() as u64 );
    Ok( PreparedMedia { body, duration_ms } )
}


/// Converts planar samples back to interleaved format.
/// [[L0, L1, ...], [R0, R1, ...]] → [L0, R0, L1, R1, ...]
fn interleave( channels: &[Vec<f32>] ) -> Vec<f32> {
    if channels.is_empty() || channels[ 0 ].is_empty() {
        return Vec::new();
    }
    let frames = channels[ 0 ].len();
    let mut out = Vec::with_capacity( frames * channels.len() );
    for f in 0..frames {
        for ch in channels {
            out.push( ch[ f ] );
        }
    }
    out
}


/// Rate converter fed with arbitrarily sized interleaved chunks.
struct StreamResampler {
    inner: FastFixedOut<f32>,
    pending: Vec<Vec<f32>>,
}


impl StreamResampler {
    fn new( from_rate: u32, to_rate: u32, channels: usize ) -> Result<Self, DecoderError> {
        tracing::debug!( "Resampling: {} Hz → {} Hz", from_rate, to_rate );

        let inner = FastFixedOut::<f32>::new(
            to_rate as f64 / from_rate as f64,
            2.0,
            PolynomialDegree::Cubic,
            1024,
            channels,
        ).map_err( |e| DecoderError::Playback( format!( "Failed to create resampler: {}", e ) ) )?;

        Ok( Self {
            inner,
            pending: ( 0..channels ).map( |_| Vec::new() ).collect(),
        })
    }


    /// Queues `samples` and returns whatever full output chunks are ready.
    fn process( &mut self, samples: &[f32] ) -> Vec<f32> {
        let channels = self.pending.len();
        for frame in samples.chunks( channels ) {
            for ( ch, sample ) in frame.iter().enumerate() {
                self.pending[ ch ].push( *sample );
            }
        }

        let mut out = Vec::new();
        while self.pending[ 0 ].len() >= self.inner.input_frames_next() {
            let needed = self.inner.input_frames_next();
            let chunk: Vec<Vec<f32>> = self.pending
                .iter_mut()
                .map( |ch| ch.drain( ..needed ).collect() )
                .collect();

            match self.inner.process( &chunk, None ) {
                Ok( resampled ) => out.extend( interleave( &resampled ) ),
                Err( e ) => {
                    tracing::error!( "Resample error: {}", e );
                    break;
                }
            }
        }
        out
    }


    /// Resamples whatever is still queued.
    fn flush( &mut self ) -> Vec<f32> {
        if self.pending[ 0 ].is_empty() {
            return Vec::new();
        }
        let channels = self.pending.len();
        let pending = std::mem::replace(
            &mut self.pending,
            ( 0..channels ).map( |_| Vec::new() ).collect(),
        );
        match self.inner.process_partial( Some( &pending ), None ) {
            Ok( resampled ) => interleave( &resampled ),
            Err( e ) => {
                tracing::error!( "Final resample error: {}", e );
                Vec::new()
            }
        }
    }
}


type SharedCompletion = Arc<Mutex<Option<CompletionCallback>>>;


/// State shared with one decode thread.
struct DecodeShared {
    sample_buffer: Arc<SampleBuffer>,
    stop_flag: Arc<AtomicBool>,
    frames_played: Arc<AtomicU64>,
    ended: Arc<AtomicBool>,
    completion: SharedCompletion,
}


impl DecodeShared {
    fn stopped( &self ) -> bool {
        self.stop_flag.load( Ordering::Relaxed )
    }


    /// Pushes all of `samples`, waiting for room. Gives up on stop.
    fn push_all( &self, samples: &[f32] ) {
        let mut offset = 0;
        while offset < samples.len() && !self.stopped() {
            let pushed = self.sample_buffer.push( &samples[ offset.. ] );
            offset += pushed;
            if pushed == 0 {
                thread::sleep( Duration::from_millis( 5 ) );
            }
        }
    }
}


/// One running output stream plus the thread feeding it.
struct Playback {
    shared: DecodeShared,
    _output: AudioOutput,
    thread: Option<thread::JoinHandle<()>>,
    sample_rate: u32,
}


impl Playback {
    fn spawn(
        media: &PreparedMedia,
        start_ms: u64,
        volume: f32,
        paused: bool,
        completion: SharedCompletion,
    ) -> Result<Self, DecoderError> {
        let mut decoder = media.body.open().map_err( |e| DecoderError::Playback( e.to_string() ) )?;
        if start_ms > 0 {
            decoder
                .seek( start_ms as f64 / 1000.0 )
                .map_err( |e| DecoderError::Playback( e.to_string() ) )?;
        }

        let source_rate = decoder.sample_rate();
        let channels = decoder.channels();
        let ( output, sample_buffer ) = AudioOutput::new( source_rate, channels as u16 )
            .map_err( |e| DecoderError::Playback( e.to_string() ) )?;
        sample_buffer.set_volume( volume );
        sample_buffer.set_paused( paused );

        let resampler = if output.sample_rate() != source_rate {
            Some( StreamResampler::new( source_rate, output.sample_rate(), channels )? )
        } else {
            None
        };

        output.play().map_err( |e| DecoderError::Playback( e.to_string() ) )?;

        let shared = DecodeShared {
            sample_buffer,
            stop_flag: Arc::new( AtomicBool::new( false ) ),
            frames_played: Arc::new( AtomicU64::new( start_ms.saturating_mul( source_rate as u64 ) / 1000 ) ),
            ended: Arc::new( AtomicBool::new( false ) ),
            completion,
        };
        let thread_shared = DecodeShared {
            sample_buffer: Arc::clone( &shared.sample_buffer ),
            stop_flag: Arc::clone( &shared.stop_flag ),
            frames_played: Arc::clone( &shared.frames_played ),
            ended: Arc::clone( &shared.ended ),
            completion: Arc::clone( &shared.completion ),
        };

        let thread = thread::Builder::new()
            .name( "sound-decode".into() )
            .spawn( move || decode_loop( decoder, resampler, thread_shared ) )
            .map_err( |e| DecoderError::Playback( format!( "Failed to spawn decode thread: {}", e ) ) )?;

        Ok( Self {
            shared,
            _output: output,
            thread: Some( thread ),
            sample_rate: source_rate,
        })
    }


    fn position_ms( &self ) -> u64 {
        self.shared.frames_played.load( Ordering::Relaxed ) * 1000 / self.sample_rate.max( 1 ) as u64
    }


    fn is_ended( &self ) -> bool {
        self.shared.ended.load( Ordering::Relaxed )
    }


    fn is_paused( &self ) -> bool {
        self.shared.sample_buffer.is_paused()
    }


    fn set_paused( &self, paused: bool ) {
        self.shared.sample_buffer.set_paused( paused );
    }


    fn set_volume( &self, volume: f32 ) {
        self.shared.sample_buffer.set_volume( volume );
    }
}


impl Drop for Playback {
    fn drop( &mut self ) {
        self.shared.stop_flag.store( true, Ordering::Relaxed );
        self.shared.sample_buffer.clear();
        if let Some( thread ) = self.thread.take() {
            let _ = thread.join();
        }
    }
}


/// Feeds the output until end of media or stop. Fires the completion
/// callback only on a natural end.
fn decode_loop( mut decoder: AudioDecoder, mut resampler: Option<StreamResampler>, shared: DecodeShared ) {
    let channels = decoder.channels().max( 1 );
    // Don't decode too far ahead; about 50ms
    let target_buffer = ( decoder.sample_rate() as usize * channels ) / 20;

    loop {
        if shared.stopped() {
            tracing::debug!( "Decode loop: stop signal received" );
            return;
        }

        if shared.sample_buffer.is_paused() || shared.sample_buffer.len() > target_buffer {
            thread::sleep( Duration::from_millis( 5 ) );
            continue;
        }

        match decoder.decode_next() {
            Ok( Some( samples ) ) => {
                shared.frames_played.fetch_add( ( samples.len() / channels ) as u64, Ordering::Relaxed );
                let samples = match resampler.as_mut() {
                    Some( resampler ) => resampler.process( &samples ),
                    None => samples,
                };
                shared.push_all( &samples );
            }
            Ok( None ) => break,
            Err( e ) => {
                tracing::error!( "Decode error: {}", e );
                break;
            }
        }
    }

    if let Some( resampler ) = resampler.as_mut() {
        shared.push_all( &resampler.flush() );
    }

    while !shared.sample_buffer.is_empty() && !shared.stopped() {
        thread::sleep( Duration::from_millis( 10 ) );
    }
    if shared.stopped() {
        return;
    }

    tracing::debug!( "Decode loop: reached end of media" );
    shared.ended.store( true, Ordering::Relaxed );
    if let Some( callback ) = shared.completion.lock().as_mut() {
        callback();
    }
}


/// Symphonia-backed `MediaDecoder`.
pub struct SymphoniaDecoder {
    locator: Option<Locator>,
    slot: Arc<Mutex<MediaSlot>>,
    playback: Option<Playback>,
    completion: SharedCompletion,
    /// Start position for the next playback
    position_ms: u64,
    volume: f32,
}


impl SymphoniaDecoder {
    pub fn new() -> Self {
        Self {
            locator: None,
            slot: Arc::new( Mutex::new( MediaSlot::default() ) ),
            playback: None,
            completion: Arc::new( Mutex::new( None ) ),
            position_ms: 0,
            volume: 1.0,
        }
    }


    fn media( &self ) -> Result<PreparedMedia, DecoderError> {
        self.slot
            .lock()
            .media
            .clone()
            .ok_or_else( || DecoderError::Playback( "media not prepared".into() ) )
    }


    fn spawn_playback( &mut self, start_ms: u64, paused: bool ) -> Result<(), DecoderError> {
        let media = self.media()?;
        let playback = Playback::spawn( &media, start_ms, self.volume, paused, Arc::clone( &self.completion ) )?;
        self.playback = Some( playback );
        Ok(())
    }
}


impl Default for SymphoniaDecoder {
    fn default() -> Self {
        Self::new()
    }
}


impl MediaDecoder for SymphoniaDecoder {
    fn set_data_source( &mut self, locator: &Locator ) -> Result<(), DecoderError> {
        self.locator = Some( locator.clone() );
        Ok(())
    }


    fn prepare( &mut self ) -> Result<(), DecoderError> {
        if self.slot.lock().media.is_some() {
            return Ok(());
        }

        let locator = self.locator
            .as_ref()
            .ok_or_else( || DecoderError::Prepare( "no data source".into() ) )?;
        let media = load_media( locator )?;
        self.slot.lock().media = Some( media );
        Ok(())
    }


    fn prepare_async( &mut self, on_prepared: PreparedCallback ) {
        let Some( locator ) = self.locator.clone() else {
            on_prepared( Err( DecoderError::Prepare( "no data source".into() ) ) );
            return;
        };

        let slot = Arc::clone( &self.slot );
        let generation = slot.lock().generation;
        let pending = Arc::new( Mutex::new( Some( on_prepared ) ) );
        let task_pending = Arc::clone( &pending );

        let spawned = thread::Builder::new()
            .name( "sound-prepare".into() )
            .spawn( move || {
                let loaded = load_media( &locator );
                let outcome = {
                    let mut slot = slot.lock();
                    if slot.generation != generation {
                        tracing::debug!( "Discarding prepare result for {}", locator );
                        return;
                    }
                    loaded.map( |media| slot.media = Some( media ) )
                };
                if let Some( callback ) = task_pending.lock().take() {
                    callback( outcome );
                }
            });

        if let Err( e ) = spawned {
            if let Some( callback ) = pending.lock().take() {
                callback( Err( DecoderError::Prepare( format!( "Failed to spawn prepare thread: {}", e ) ) ) );
            }
        }
    }


    fn start( &mut self ) -> Result<(), DecoderError> {
        match self.playback.as_ref() {
            Some( playback ) if !playback.is_ended() => {
                playback.set_paused( false );
                Ok(())
            }
            Some( _ ) => {
                self.playback = None;
                self.spawn_playback( 0, false )
            }
            None => self.spawn_playback( self.position_ms, false ),
        }
    }


    fn pause( &mut self ) -> Result<(), DecoderError> {
        if let Some( playback ) = self.playback.as_ref() {
            playback.set_paused( true );
        }
        Ok(())
    }


    fn stop( &mut self ) -> Result<(), DecoderError> {
        self.playback = None;
        self.position_ms = 0;
        Ok(())
    }


    fn seek_to( &mut self, position_ms: u64 ) -> Result<(), DecoderError> {
        let position_ms = match self.duration() {
            Some( duration ) => position_ms.min( duration ),
            None => position_ms,
        };
        self.position_ms = position_ms;

        match self.playback.take() {
            Some( playback ) if !playback.is_ended() => {
                let paused = playback.is_paused();
                drop( playback );
                self.spawn_playback( position_ms, paused )
            }
            _ => Ok(()),
        }
    }


    fn set_volume( &mut self, volume: f32 ) {
        self.volume = volume;
        if let Some( playback ) = self.playback.as_ref() {
            playback.set_volume( volume );
        }
    }


    fn current_position( &self ) -> u64 {
        let position = match self.playback.as_ref() {
            Some( playback ) => playback.position_ms(),
            None => self.position_ms,
        };
        match self.duration() {
            Some( duration ) => position.min( duration ),
            None => position,
        }
    }


    fn duration( &self ) -> Option<u64> {
        self.slot.lock().media.as_ref().and_then( |m| m.duration_ms )
    }


    fn is_playing( &self ) -> bool {
        self.playback
            .as_ref()
            .is_some_and( |p| !p.is_paused() && !p.is_ended() )
    }


    fn set_on_completion( &mut self, callback: CompletionCallback ) {
        *self.completion.lock() = Some( callback );
    }


    fn reset( &mut self ) {
        self.playback = None;
        {
            let mut slot = self.slot.lock();
            slot.generation += 1;
            slot.media = None;
        }
        self.locator = None;
        self.position_ms = 0;
    }


    fn release( &mut self ) {
        self.reset();
        *self.completion.lock() = None;
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use crate::testing::write_wav;
    use tempfile::TempDir;
    use std::sync::mpsc;


    fn wav_file( scratch: &TempDir, name: &str ) -> PathBuf {
        write_wav( scratch.path(), name, 8000, &[ 0; 4000 ] )
    }


    #[test]
    fn test_interleave() {
        let planar = vec![ vec![ 1.0, 2.0 ], vec![ 3.0, 4.0 ] ];
        assert_eq!( interleave( &planar ), vec![ 1.0, 3.0, 2.0, 4.0 ] );
        assert!( interleave( &[] ).is_empty() );
    }


    #[test]
    fn test_resampler_doubles_rate() {
        let mut resampler = StreamResampler::new( 22050, 44100, 2 ).unwrap();
        let input = vec![ 0.0; 2 * 22050 ];

        let mut out = resampler.process( &input );
        out.extend( resampler.flush() );

        let frames = out.len() / 2;
        assert!( frames > 40000 && frames < 48000, "got {} frames", frames );
        assert_eq!( out.len() % 2, 0 );
    }


    #[test]
    fn test_prepare_local_file() {
        let scratch = tempfile::tempdir().unwrap();
        let path = wav_file( &scratch, "files/half.wav" );

        let mut decoder = SymphoniaDecoder::new();
        decoder.set_data_source( &Locator::File { path } ).unwrap();
        decoder.prepare().unwrap();

        assert_eq!( decoder.duration(), Some( 500 ) );
        assert_eq!( decoder.current_position(), 0 );
        assert!( !decoder.is_playing() );
    }


    #[test]
    fn test_prepare_missing_file_fails() {
        let scratch = tempfile::tempdir().unwrap();

        let mut decoder = SymphoniaDecoder::new();
        let locator = Locator::File { path: scratch.path().join( "nope.mp3" ) };
        decoder.set_data_source( &locator ).unwrap();

        assert!( matches!( decoder.prepare(), Err( DecoderError::Prepare( _ ) ) ) );
        assert_eq!( decoder.duration(), None );
    }


    #[test]
    fn test_prepare_async_file_url() {
        let scratch = tempfile::tempdir().unwrap();
        let path = wav_file( &scratch, "clip.wav" );
        let url = format!( "file://{}", path.display() );

        let mut decoder = SymphoniaDecoder::new();
        decoder.set_data_source( &Locator::Url { url } ).unwrap();

        let ( tx, rx ) = mpsc::channel();
        decoder.prepare_async( Box::new( move |result| {
            let _ = tx.send( result.is_ok() );
        }));

        assert!( rx.recv_timeout( Duration::from_secs( 5 ) ).unwrap() );
        assert_eq!( decoder.duration(), Some( 500 ) );
    }


    #[test]
    fn test_prepare_async_bad_url_reports_error() {
        let mut decoder = SymphoniaDecoder::new();
        decoder.set_data_source( &Locator::Url { url: "not a url".into() } ).unwrap();

        let ( tx, rx ) = mpsc::channel();
        decoder.prepare_async( Box::new( move |result| {
            let _ = tx.send( result.map_err( |e| e.to_string() ) );
        }));

        let result = rx.recv_timeout( Duration::from_secs( 5 ) ).unwrap();
        assert_eq!( result, Err( "Prepare failed: Unsupported URL: not a url".to_string() ) );
    }


    #[test]
    fn test_reset_forgets_media() {
        let scratch = tempfile::tempdir().unwrap();
        let path = wav_file( &scratch, "a.wav" );

        let mut decoder = SymphoniaDecoder::new();
        decoder.set_data_source( &Locator::File { path } ).unwrap();
        decoder.prepare().unwrap();
        decoder.seek_to( 200 ).unwrap();
        assert_eq!( decoder.current_position(), 200 );

        decoder.reset();
        assert_eq!( decoder.duration(), None );
        assert_eq!( decoder.current_position(), 0 );
        assert!( matches!( decoder.start(), Err( DecoderError::Playback( _ ) ) ) );
    }
}
