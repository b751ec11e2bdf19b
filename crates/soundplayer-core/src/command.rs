//! Host method parsing
//!
//! Hosts that talk to the player over a text channel send one method call
//! per line, e.g. `playSoundFile beep mp3 alarm`. The session key is always
//! the last, optional argument.

use std::str::FromStr;

use thiserror::Error;


/// Key used when the host does not name a session.
pub const DEFAULT_KEY: &str = "soundPlayerDefaultKey";


#[derive( Debug, Error )]
pub enum CommandError {
    #[error( "Unknown command: {0}" )]
    Unknown( String ),

    #[error( "Invalid argument: {0}" )]
    InvalidArgument( String ),

    #[error( "Missing argument: {0}" )]
    MissingArgument( String ),
}


/// Parsed host method call.
#[derive( Debug, Clone, PartialEq )]
pub enum Command {
    // Mounting
    PlaySoundFile { name: String, kind: String, key: String },
    PlaySoundFileWithDelay { name: String, kind: String, delay: f64, key: String },
    LoadSoundFile { name: String, kind: String, key: String },
    PlayUrl { url: String, key: String },
    LoadUrl { url: String, key: String },

    // Transport
    Pause { key: String },
    Resume { key: String },
    Stop { key: String },
    Seek { seconds: f64, key: String },
    SetVolume { volume: f32, key: String },
    SetLooping { key: String },
    SetNumberOfLoops { loops: i32, key: String },
    GetInfo { key: String },

    // Device
    SetSpeaker { on: bool },

    Help,
    Quit,
}


/// On/off argument.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub struct Switch( pub bool );


impl FromStr for Switch {
    type Err = CommandError;


    fn from_str( s: &str ) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "on" | "true" | "1" | "yes" => Ok( Switch( true ) ),
            "off" | "false" | "0" | "no" => Ok( Switch( false ) ),
            _ => Err( CommandError::InvalidArgument(
                format!( "Invalid switch: '{}'. Use 'on' or 'off'", s )
            )),
        }
    }
}


/// Positional arguments of one call.
struct Args<'a> {
    items: Vec<&'a str>,
    next: usize,
}


impl<'a> Args<'a> {
    fn required( &mut self, what: &str ) -> Result<&'a str, CommandError> {
        let item = self.items
            .get( self.next )
            .copied()
            .ok_or_else( || CommandError::MissingArgument( what.into() ) )?;
        self.next += 1;
        Ok( item )
    }


    /// The trailing session key, or the default one.
    fn key( &mut self ) -> Result<String, CommandError> {
        let key = match self.items.get( self.next ) {
            Some( key ) => {
                self.next += 1;
                key.to_string()
            }
            None => DEFAULT_KEY.to_string(),
        };
        self.finish()?;
        Ok( key )
    }


    fn finish( &self ) -> Result<(), CommandError> {
        match self.items.get( self.next.. ) {
            Some( extra ) if !extra.is_empty() => Err( CommandError::InvalidArgument(
                format!( "Unexpected arguments: {}", extra.join( " " ) )
            )),
            _ => Ok(()),
        }
    }
}


impl Command {
    /// Parses one line. Method names are case-insensitive.
    pub fn parse( input: &str ) -> Result<Self, CommandError> {
        let mut words = input.split_whitespace();
        let cmd = words.next().unwrap_or( "" ).to_lowercase();
        let mut args = Args { items: words.collect(), next: 0 };

        match cmd.as_str() {
            "playsoundfile" | "p" => {
                let ( name, kind ) = ( args.required( "name" )?, sound_type( args.required( "type" )? ) );
                Ok( Command::PlaySoundFile { name: name.into(), kind, key: args.key()? } )
            }
            "playsoundfilewithdelay" | "delay" | "pd" => {
                let ( name, kind ) = ( args.required( "name" )?, sound_type( args.required( "type" )? ) );
                let delay = parse_time( args.required( "delay" )? )?;
                Ok( Command::PlaySoundFileWithDelay { name: name.into(), kind, delay, key: args.key()? } )
            }
            "loadsoundfile" | "load" | "l" => {
                let ( name, kind ) = ( args.required( "name" )?, sound_type( args.required( "type" )? ) );
                Ok( Command::LoadSoundFile { name: name.into(), kind, key: args.key()? } )
            }
            "playurl" | "url" | "u" => {
                let url = args.required( "url" )?;
                Ok( Command::PlayUrl { url: url.into(), key: args.key()? } )
            }
            "loadurl" | "lu" => {
                let url = args.required( "url" )?;
                Ok( Command::LoadUrl { url: url.into(), key: args.key()? } )
            }

            "pause" | "pa" => Ok( Command::Pause { key: args.key()? } ),
            "resume" | "play" | "r" => Ok( Command::Resume { key: args.key()? } ),
            "stop" | "st" => Ok( Command::Stop { key: args.key()? } ),
            "seek" | "sk" => {
                let seconds = parse_time( args.required( "time position" )? )?;
                Ok( Command::Seek { seconds, key: args.key()? } )
            }
            "setvolume" | "volume" | "vol" => {
                let level = args.required( "volume" )?;
                let volume = level.parse::<f32>()
                    .map_err( |_| CommandError::InvalidArgument( format!( "Invalid volume: {}", level ) ) )?;
                Ok( Command::SetVolume { volume, key: args.key()? } )
            }
            "setlooping" | "loop" => Ok( Command::SetLooping { key: args.key()? } ),
            "setnumberofloops" | "loops" => {
                let count = args.required( "loop count" )?;
                let loops = count.parse::<i32>()
                    .map_err( |_| CommandError::InvalidArgument( format!( "Invalid loop count: {}", count ) ) )?;
                Ok( Command::SetNumberOfLoops { loops, key: args.key()? } )
            }
            "getinfo" | "info" | "i" => Ok( Command::GetInfo { key: args.key()? } ),

            "setspeaker" | "speaker" => {
                let Switch( on ) = args.required( "on/off" )?.parse::<Switch>()?;
                args.finish()?;
                Ok( Command::SetSpeaker { on } )
            }

            "help" | "h" | "?" => Ok( Command::Help ),
            "quit" | "q" | "exit" => Ok( Command::Quit ),

            "" => Err( CommandError::Unknown( "empty command".into() ) ),
            other => Err( CommandError::Unknown( other.to_string() ) ),
        }
    }


    /// Brief description for help text.
    pub fn description( &self ) -> &'static str {
        match self {
            Command::PlaySoundFile { .. } => "Mount a named sound and play it",
            Command::PlaySoundFileWithDelay { .. } => "Mount a named sound and play it after a delay",
            Command::LoadSoundFile { .. } => "Mount a named sound without playing",
            Command::PlayUrl { .. } => "Mount a URL and play it",
            Command::LoadUrl { .. } => "Mount a URL without playing",
            Command::Pause { .. } => "Pause a session",
            Command::Resume { .. } => "Start or continue a session",
            Command::Stop { .. } => "Stop a session",
            Command::Seek { .. } => "Seek to position",
            Command::SetVolume { .. } => "Set volume (0.0-1.0)",
            Command::SetLooping { .. } => "Loop a session",
            Command::SetNumberOfLoops { .. } => "Repeat a session a number of times",
            Command::GetInfo { .. } => "Print position and duration",
            Command::SetSpeaker { .. } => "Route audio to the speaker",
            Command::Help => "Show help",
            Command::Quit => "Release everything and exit",
        }
    }
}


/// `-` stands for an empty type, for names without an extension.
fn sound_type( s: &str ) -> String {
    if s == "-" { String::new() } else { s.to_string() }
}


/// Parses a time string like "1:30", "1:30.5" or "90.25" into seconds.
fn parse_time( s: &str ) -> Result<f64, CommandError> {
    let s = s.trim();

    let seconds = if let Some(( min, sec )) = s.split_once( ':' ) {
        let minutes: u64 = min.parse()
            .map_err( |_| CommandError::InvalidArgument( format!( "Invalid minutes: {}", min ) ) )?;
        let seconds: f64 = sec.parse()
            .map_err( |_| CommandError::InvalidArgument( format!( "Invalid seconds: {}", sec ) ) )?;
        minutes as f64 * 60.0 + seconds
    } else {
        s.parse::<f64>()
            .map_err( |_| CommandError::InvalidArgument( format!( "Invalid time: {}", s ) ) )?
    };

    if seconds.is_finite() {
        Ok( seconds )
    } else {
        Err( CommandError::InvalidArgument( format!( "Invalid time: {}", s ) ) )
    }
}


/// Returns help text listing all available commands.
pub fn help_text() -> &'static str {
    r#"Mounting:
  playSoundFile <name> <type> [key]   Mount a named sound and play it   [p]
  playSoundFileWithDelay <name> <type> <delay> [key]
                                      Mount now, play after <delay>     [pd]
  loadSoundFile <name> <type> [key]   Mount without playing             [l]
  playUrl <url> [key]                 Mount a URL and play it           [u]
  loadUrl <url> [key]                 Mount a URL without playing       [lu]

Transport:
  pause [key]                         Pause                             [pa]
  resume [key]                        Start or continue                 [r, play]
  stop [key]                          Stop                              [st]
  seek <time> [key]                   Seek (e.g. 1:30 or 12.5)          [sk]
  setVolume <0.0-1.0> [key]           Set volume                        [vol]
  setLooping [key]                    Restart at every end              [loop]
  setNumberOfLoops <n> [key]          Repeat n more times, <0 forever   [loops]
  getInfo [key]                       Print position and duration       [i]

Device:
  setSpeaker <on|off>                 Route audio to the speaker        [speaker]

Other:
  help                                Show this help                    [?]
  quit                                Release everything and exit       [q]

Use '-' as <type> for names without an extension. Without [key] the
default session is used. Loop settings survive a remount of the key."#
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_parse_play_sound_file() {
        let cmd = Command::parse( "playSoundFile beep mp3 alarm" ).unwrap();
        assert_eq!( cmd, Command::PlaySoundFile { name: "beep".into(), kind: "mp3".into(), key: "alarm".into() } );
    }


    #[test]
    fn test_default_key() {
        let cmd = Command::parse( "p beep mp3" ).unwrap();
        assert_eq!( cmd, Command::PlaySoundFile { name: "beep".into(), kind: "mp3".into(), key: DEFAULT_KEY.into() } );
        assert_eq!( Command::parse( "pause" ).unwrap(), Command::Pause { key: DEFAULT_KEY.into() } );
    }


    #[test]
    fn test_dash_means_empty_type() {
        let cmd = Command::parse( "load clip -" ).unwrap();
        assert_eq!( cmd, Command::LoadSoundFile { name: "clip".into(), kind: String::new(), key: DEFAULT_KEY.into() } );
    }


    #[test]
    fn test_parse_url() {
        let cmd = Command::parse( "playUrl https://example.com/a.mp3 radio" ).unwrap();
        assert_eq!( cmd, Command::PlayUrl { url: "https://example.com/a.mp3".into(), key: "radio".into() } );
    }


    #[test]
    fn test_parse_seek() {
        assert_eq!( Command::parse( "seek 1:30 a" ).unwrap(), Command::Seek { seconds: 90.0, key: "a".into() } );
        assert_eq!( Command::parse( "sk 2.5" ).unwrap(), Command::Seek { seconds: 2.5, key: DEFAULT_KEY.into() } );
        assert!( matches!( Command::parse( "seek soon" ), Err( CommandError::InvalidArgument( _ ) ) ) );
    }


    #[test]
    fn test_parse_volume() {
        let cmd = Command::parse( "setVolume 0.5 a" ).unwrap();
        assert_eq!( cmd, Command::SetVolume { volume: 0.5, key: "a".into() } );
        assert!( matches!( Command::parse( "vol loud" ), Err( CommandError::InvalidArgument( _ ) ) ) );
    }


    #[test]
    fn test_parse_delay_and_loops() {
        let cmd = Command::parse( "playSoundFileWithDelay beep mp3 1.5 a" ).unwrap();
        assert_eq!( cmd, Command::PlaySoundFileWithDelay {
            name: "beep".into(),
            kind: "mp3".into(),
            delay: 1.5,
            key: "a".into(),
        });
        assert!( matches!( Command::parse( "pd beep mp3" ), Err( CommandError::MissingArgument( _ ) ) ) );

        assert_eq!( Command::parse( "loops -1 a" ).unwrap(), Command::SetNumberOfLoops { loops: -1, key: "a".into() } );
        assert!( matches!( Command::parse( "loops many" ), Err( CommandError::InvalidArgument( _ ) ) ) );
    }


    #[test]
    fn test_play_is_resume() {
        assert_eq!( Command::parse( "play a" ).unwrap(), Command::Resume { key: "a".into() } );
    }


    #[test]
    fn test_parse_speaker() {
        assert_eq!( Command::parse( "setSpeaker on" ).unwrap(), Command::SetSpeaker { on: true } );
        assert_eq!( Command::parse( "speaker 0" ).unwrap(), Command::SetSpeaker { on: false } );
        assert!( matches!( Command::parse( "speaker maybe" ), Err( CommandError::InvalidArgument( _ ) ) ) );
    }


    #[test]
    fn test_extra_arguments_rejected() {
        let result = Command::parse( "stop a b" );
        assert!( matches!( result, Err( CommandError::InvalidArgument( _ ) ) ) );
    }


    #[test]
    fn test_parse_unknown() {
        assert!( matches!( Command::parse( "foobar" ), Err( CommandError::Unknown( _ ) ) ) );
        assert!( matches!( Command::parse( "   " ), Err( CommandError::Unknown( _ ) ) ) );
    }


    #[test]
    fn test_parse_missing_arg() {
        let result = Command::parse( "playSoundFile beep" );
        assert!( matches!( result, Err( CommandError::MissingArgument( _ ) ) ) );
    }
}
