//! Test doubles shared by the unit tests

use std::io::Cursor;
use std::path::{ Path, PathBuf };
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::event::NotificationSink;
use crate::locator::Locator;
use crate::media::{ CompletionCallback, DecoderBackend, DecoderError, MediaDecoder, PreparedCallback };
use crate::registry::{ DecoderNotice, NoticeSender };
use crate::route::{ AudioMode, AudioRouter };


/// Creates an empty file under `dir`, including its parent directories.
pub fn touch( dir: &Path, relative: &str ) -> PathBuf {
    let file = dir.join( relative );
    if let Some( parent ) = file.parent() {
        std::fs::create_dir_all( parent ).unwrap();
    }
    std::fs::write( &file, b"" ).unwrap();
    file
}


/// What a mock decoder has been asked to do.
pub struct MockProbe {
    pub calls: Vec<&'static str>,
    pub source: Option<Locator>,
    pub playing: bool,
    pub stops: usize,
    pub pauses: usize,
    pub releases: usize,
    pub resets: usize,
    pub volume: Option<f32>,
    pub position_ms: u64,
    pub duration_ms: u64,
    pub completion: Option<CompletionCallback>,
    pub prepared: Option<PreparedCallback>,
    /// Makes `seek_to` fail and drop the running stream.
    pub fail_seek: bool,
}


impl Default for MockProbe {
    fn default() -> Self {
        Self {
            calls: Vec::new(),
            source: None,
            playing: false,
            stops: 0,
            pauses: 0,
            releases: 0,
            resets: 0,
            volume: None,
            position_ms: 0,
            duration_ms: 3250,
            completion: None,
            prepared: None,
            fail_seek: false,
        }
    }
}


#[derive( Default )]
struct MockState {
    probes: Vec<Arc<Mutex<MockProbe>>>,
    refuse_create: bool,
}


/// Backend handing out scripted decoders. Clones share state.
#[derive( Clone, Default )]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
    failures: Arc<Mutex<Vec<String>>>,
}


impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }


    /// Makes synchronous prepares fail for locators containing `fragment`.
    pub fn fail_on( &self, fragment: &str ) {
        self.failures.lock().push( fragment.to_string() );
    }


    /// Makes every following `create` return `None`.
    pub fn refuse_create( &self ) {
        self.state.lock().refuse_create = true;
    }


    pub fn created( &self ) -> usize {
        self.state.lock().probes.len()
    }


    pub fn probe( &self, index: usize ) -> Arc<Mutex<MockProbe>> {
        Arc::clone( &self.state.lock().probes[ index ] )
    }


    /// Settles the pending asynchronous prepare of decoder `index`, if any.
    pub fn finish_prepare( &self, index: usize, result: Result<(), DecoderError> ) {
        let callback = self.probe( index ).lock().prepared.take();
        if let Some( callback ) = callback {
            callback( result );
        }
    }


    /// Plays decoder `index` to the end and fires its completion callback.
    pub fn complete( &self, index: usize ) {
        let probe = self.probe( index );
        let callback = {
            let mut probe = probe.lock();
            probe.playing = false;
            probe.position_ms = probe.duration_ms;
            probe.completion.take()
        };

        if let Some( mut callback ) = callback {
            callback();
            let mut probe = probe.lock();
            if probe.completion.is_none() {
                probe.completion = Some( callback );
            }
        }
    }
}


impl DecoderBackend for MockBackend {
    fn create( &mut self ) -> Option<Box<dyn MediaDecoder>> {
        let mut state = self.state.lock();
        if state.refuse_create {
            return None;
        }

        let probe = Arc::new( Mutex::new( MockProbe::default() ) );
        state.probes.push( Arc::clone( &probe ) );
        Some( Box::new( MockDecoder { probe, failures: Arc::clone( &self.failures ) } ) )
    }
}


struct MockDecoder {
    probe: Arc<Mutex<MockProbe>>,
    failures: Arc<Mutex<Vec<String>>>,
}


impl MediaDecoder for MockDecoder {
    fn set_data_source( &mut self, locator: &Locator ) -> Result<(), DecoderError> {
        let mut probe = self.probe.lock();
        probe.calls.push( "set_data_source" );
        probe.source = Some( locator.clone() );
        Ok(())
    }


    fn prepare( &mut self ) -> Result<(), DecoderError> {
        let mut probe = self.probe.lock();
        probe.calls.push( "prepare" );

        let locator = probe.source.as_ref().map( |l| l.to_string() ).unwrap_or_default();
        if self.failures.lock().iter().any( |f| locator.contains( f.as_str() ) ) {
            return Err( DecoderError::Prepare( format!( "cannot open {}", locator ) ) );
        }
        Ok(())
    }


    fn prepare_async( &mut self, on_prepared: PreparedCallback ) {
        let mut probe = self.probe.lock();
        probe.calls.push( "prepare_async" );
        probe.prepared = Some( on_prepared );
    }


    fn start( &mut self ) -> Result<(), DecoderError> {
        let mut probe = self.probe.lock();
        probe.calls.push( "start" );
        probe.playing = true;
        Ok(())
    }


    fn pause( &mut self ) -> Result<(), DecoderError> {
        let mut probe = self.probe.lock();
        probe.pauses += 1;
        probe.playing = false;
        Ok(())
    }


    fn stop( &mut self ) -> Result<(), DecoderError> {
        let mut probe = self.probe.lock();
        probe.stops += 1;
        probe.playing = false;
        probe.position_ms = 0;
        Ok(())
    }


    fn seek_to( &mut self, position_ms: u64 ) -> Result<(), DecoderError> {
        let mut probe = self.probe.lock();
        if probe.fail_seek {
            probe.playing = false;
            return Err( DecoderError::Playback( format!( "cannot seek to {} ms", position_ms ) ) );
        }
        probe.position_ms = position_ms;
        Ok(())
    }


    fn set_volume( &mut self, volume: f32 ) {
        self.probe.lock().volume = Some( volume );
    }


    fn current_position( &self ) -> u64 {
        self.probe.lock().position_ms
    }


    fn duration( &self ) -> Option<u64> {
        Some( self.probe.lock().duration_ms )
    }


    fn is_playing( &self ) -> bool {
        self.probe.lock().playing
    }


    fn set_on_completion( &mut self, callback: CompletionCallback ) {
        let mut probe = self.probe.lock();
        probe.calls.push( "set_on_completion" );
        probe.completion = Some( callback );
    }


    fn reset( &mut self ) {
        let mut probe = self.probe.lock();
        probe.resets += 1;
        probe.source = None;
        probe.playing = false;
        probe.position_ms = 0;
        probe.prepared = None;
    }


    fn release( &mut self ) {
        let mut probe = self.probe.lock();
        probe.releases += 1;
        probe.playing = false;
        probe.completion = None;
        probe.prepared = None;
    }
}


/// Sink remembering every event it receives.
#[derive( Default )]
pub struct RecordingSink {
    pub events: Mutex<Vec<( String, Value )>>,
}


impl RecordingSink {
    pub fn names( &self ) -> Vec<String> {
        self.events.lock().iter().map( |( name, _ )| name.clone() ).collect()
    }


    pub fn payload( &self, index: usize ) -> Value {
        self.events.lock()[ index ].1.clone()
    }


    pub fn clear( &self ) {
        self.events.lock().clear();
    }
}


impl NotificationSink for RecordingSink {
    fn emit( &self, name: &str, payload: Value ) {
        self.events.lock().push( ( name.to_string(), payload ) );
    }
}


/// One call made on a `RecordingRouter`.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum RouteCall {
    Mode( AudioMode ),
    Speakerphone( bool ),
}


/// Router remembering every call. Clones share the log.
#[derive( Clone, Default )]
pub struct RecordingRouter {
    calls: Arc<Mutex<Vec<RouteCall>>>,
}


impl RecordingRouter {
    pub fn calls( &self ) -> Vec<RouteCall> {
        self.calls.lock().clone()
    }
}


impl AudioRouter for RecordingRouter {
    fn set_mode( &mut self, mode: AudioMode ) {
        self.calls.lock().push( RouteCall::Mode( mode ) );
    }


    fn set_speakerphone_on( &mut self, on: bool ) {
        self.calls.lock().push( RouteCall::Speakerphone( on ) );
    }
}


/// A notice sender whose notices can be drained by the test.
pub fn notice_channel() -> ( NoticeSender, mpsc::UnboundedReceiver<DecoderNotice> ) {
    let ( tx, rx ) = mpsc::unbounded_channel();
    let sender: NoticeSender = Arc::new( move |notice| {
        let _ = tx.send( notice );
    });
    ( sender, rx )
}


fn mono_spec( sample_rate: u32 ) -> hound::WavSpec {
    hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    }
}


/// A 16-bit mono PCM WAV body.
pub fn wav_bytes( sample_rate: u32, samples: &[i16] ) -> Vec<u8> {
    let mut cursor = Cursor::new( Vec::new() );
    let mut writer = hound::WavWriter::new( &mut cursor, mono_spec( sample_rate ) ).unwrap();
    for &sample in samples {
        writer.write_sample( sample ).unwrap();
    }
    writer.finalize().unwrap();
    cursor.into_inner()
}


/// Writes a 16-bit mono PCM WAV file under `dir`.
pub fn write_wav( dir: &Path, relative: &str, sample_rate: u32, samples: &[i16] ) -> PathBuf {
    let path = touch( dir, relative );
    let mut writer = hound::WavWriter::create( &path, mono_spec( sample_rate ) ).unwrap();
    for &sample in samples {
        writer.write_sample( sample ).unwrap();
    }
    writer.finalize().unwrap();
    path
}
