//! Remote control key codes sent with `X_SendKey`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

macro_rules! keys {
    ($($variant:ident => $code:literal, $name:literal;)*) => {
        /// A key on the Viera remote.
        ///
        /// Parses from either the wire code (`NRC_MUTE-ONOFF`) or the short
        /// name (`mute`). Codes not listed here go through [`Key::Custom`].
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[non_exhaustive]
        pub enum Key {
            $(
                #[doc = concat!("`", $code, "`")]
                $variant,
            )*
            /// Any other code, sent verbatim.
            Custom(String),
        }

        impl Key {
            /// Every catalogued key.
            pub const ALL: &'static [Key] = &[$(Key::$variant),*];

            /// Wire code, e.g. `NRC_POWER-ONOFF`.
            pub fn code(&self) -> &str {
                match self {
                    $(Key::$variant => $code,)*
                    Key::Custom(code) => code,
                }
            }

            /// Short name, e.g. `power`. Custom keys return their code.
            pub fn name(&self) -> &str {
                match self {
                    $(Key::$variant => $name,)*
                    Key::Custom(code) => code,
                }
            }
        }
    };
}

keys! {
    Power => "NRC_POWER-ONOFF", "power";
    VolumeUp => "NRC_VOLUP-ONOFF", "volume_up";
    VolumeDown => "NRC_VOLDOWN-ONOFF", "volume_down";
    Mute => "NRC_MUTE-ONOFF", "mute";
    ChannelUp => "NRC_CH_UP-ONOFF", "ch_up";
    ChannelDown => "NRC_CH_DOWN-ONOFF", "ch_down";
    LastView => "NRC_R_TUNE-ONOFF", "last_view";
    Num0 => "NRC_D0-ONOFF", "num_0";
    Num1 => "NRC_D1-ONOFF", "num_1";
    Num2 => "NRC_D2-ONOFF", "num_2";
    Num3 => "NRC_D3-ONOFF", "num_3";
    Num4 => "NRC_D4-ONOFF", "num_4";
    Num5 => "NRC_D5-ONOFF", "num_5";
    Num6 => "NRC_D6-ONOFF", "num_6";
    Num7 => "NRC_D7-ONOFF", "num_7";
    Num8 => "NRC_D8-ONOFF", "num_8";
    Num9 => "NRC_D9-ONOFF", "num_9";
    Up => "NRC_UP-ONOFF", "up";
    Down => "NRC_DOWN-ONOFF", "down";
    Left => "NRC_LEFT-ONOFF", "left";
    Right => "NRC_RIGHT-ONOFF", "right";
    Enter => "NRC_ENTER-ONOFF", "enter";
    Back => "NRC_RETURN-ONOFF", "back";
    Exit => "NRC_CANCEL-ONOFF", "exit";
    Home => "NRC_HOME-ONOFF", "home";
    Menu => "NRC_MENU-ONOFF", "menu";
    Submenu => "NRC_SUBMENU-ONOFF", "option";
    Info => "NRC_INFO-ONOFF", "info";
    Guide => "NRC_EPG-ONOFF", "guide";
    Text => "NRC_TEXT-ONOFF", "text";
    Subtitles => "NRC_STTL-ONOFF", "subtitles";
    Aspect => "NRC_ASPECT-ONOFF", "aspect";
    OffTimer => "NRC_OFFTIMER-ONOFF", "off_timer";
    Red => "NRC_RED-ONOFF", "red";
    Green => "NRC_GREEN-ONOFF", "green";
    Yellow => "NRC_YELLOW-ONOFF", "yellow";
    Blue => "NRC_BLUE-ONOFF", "blue";
    Play => "NRC_PLAY-ONOFF", "play";
    Pause => "NRC_PAUSE-ONOFF", "pause";
    Stop => "NRC_STOP-ONOFF", "stop";
    Record => "NRC_REC-ONOFF", "record";
    FastForward => "NRC_FF-ONOFF", "fast_forward";
    Rewind => "NRC_REW-ONOFF", "rewind";
    SkipNext => "NRC_SKIP_NEXT-ONOFF", "skip_next";
    SkipPrev => "NRC_SKIP_PREV-ONOFF", "skip_prev";
    Input => "NRC_CHG_INPUT-ONOFF", "input";
    Tv => "NRC_TV-ONOFF", "tv";
    Hdmi1 => "NRC_HDMI1", "hdmi1";
    Hdmi2 => "NRC_HDMI2", "hdmi2";
    Hdmi3 => "NRC_HDMI3", "hdmi3";
    Hdmi4 => "NRC_HDMI4", "hdmi4";
    Apps => "NRC_APPS-ONOFF", "apps";
    Internet => "NRC_INTERNET-ONOFF", "internet";
    VieraLink => "NRC_VIERA_LINK-ONOFF", "viera_link";
    VieraTools => "NRC_VTOOLS-ONOFF", "viera_tools";
    Netflix => "NRC_NETFLIX-ONOFF", "netflix";
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Key {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::InvalidArgument("key must not be empty".into()));
        }
        if let Some(key) = Key::ALL
            .iter()
            .find(|k| k.code() == s || k.name().eq_ignore_ascii_case(s))
        {
            return Ok(key.clone());
        }
        if s.starts_with("NRC_") {
            return Ok(Key::Custom(s.to_string()));
        }
        Err(Error::InvalidArgument(format!("unknown key: {s}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(Key::Power.code(), "NRC_POWER-ONOFF");
        assert_eq!(Key::Num7.code(), "NRC_D7-ONOFF");
        assert_eq!(Key::Custom("NRC_3D-ONOFF".into()).code(), "NRC_3D-ONOFF");
        assert_eq!(Key::Mute.to_string(), "NRC_MUTE-ONOFF");
    }

    #[test]
    fn test_parse_by_code_or_name() {
        assert_eq!("NRC_VOLUP-ONOFF".parse::<Key>().unwrap(), Key::VolumeUp);
        assert_eq!("volume_up".parse::<Key>().unwrap(), Key::VolumeUp);
        assert_eq!("HDMI2".parse::<Key>().unwrap(), Key::Hdmi2);
    }

    #[test]
    fn test_parse_uncatalogued_code() {
        assert_eq!(
            "NRC_PICTAI-ONOFF".parse::<Key>().unwrap(),
            Key::Custom("NRC_PICTAI-ONOFF".into())
        );
    }

    #[test]
    fn test_parse_rejects_unknown() {
        assert!(matches!("bogus".parse::<Key>(), Err(Error::InvalidArgument(_))));
        assert!(matches!("  ".parse::<Key>(), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_names_and_codes_are_unique() {
        let mut codes = std::collections::HashSet::new();
        let mut names = std::collections::HashSet::new();
        for key in Key::ALL {
            assert!(codes.insert(key.code()), "duplicate code {}", key.code());
            assert!(names.insert(key.name()), "duplicate name {}", key.name());
        }
    }
}
