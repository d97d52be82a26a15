//! Textual rendering, a left inverse of [`super::grammar::parse`] modulo
//! grant-internal gid ordering and whitespace (spec §4.5).

use std::fmt;

use super::{CapSpec, Grant, Match, Policy};

impl fmt::Display for CapSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.allow_all() {
            return write!(f, "*");
        }
        if self.allow_read() {
            write!(f, "r")?;
        }
        if self.allow_write() {
            write!(f, "w")?;
        }
        if self.allow_set_vxattr() {
            write!(f, "p")?;
        }
        if self.allow_snapshot() {
            write!(f, "s")?;
        }
        Ok(())
    }
}

impl fmt::Display for Match {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.path.is_empty() {
            write!(f, "path=\"/{}\"", self.path)?;
            if self.uid != super::UID_ANY {
                write!(f, " ")?;
            }
        }
        if self.uid != super::UID_ANY {
            write!(f, "uid={}", self.uid)?;
            if !self.gids.is_empty() {
                write!(f, " gids=")?;
                for (i, gid) in self.gids.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{gid}")?;
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for Grant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "allow {}", self.spec)?;
        if !self.matcher.is_match_all() {
            write!(f, " {}", self.matcher)?;
        }
        Ok(())
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MDSAuthCaps[")?;
        for (i, grant) in self.grants.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{grant}")?;
        }
        write!(f, "]")
    }
}

impl Policy {
    /// Render just the grant list, comma-separated, with no wrapper — the
    /// form that can be fed back into [`Policy::parse`]. [`Policy`]'s
    /// `Display` impl instead renders the `MDSAuthCaps[...]` wrapper used
    /// for logging, which is not itself re-parseable.
    #[must_use]
    pub fn to_cap_string(&self) -> String {
        self.grants
            .iter()
            .map(std::string::ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::super::{Policy, UID_ANY};
    use super::*;

    #[test]
    fn capspec_display_matches_grammar_letters() {
        assert_eq!(CapSpec::LETTER_R.to_string(), "r");
        assert_eq!(CapSpec::LETTER_RW.to_string(), "rw");
        assert_eq!(CapSpec::LETTER_RWP.to_string(), "rwp");
        assert_eq!(CapSpec::LETTER_RWS.to_string(), "rws");
        assert_eq!(CapSpec::LETTER_RWPS.to_string(), "rwps");
        assert_eq!(CapSpec::ALL.to_string(), "*");
    }

    #[test]
    fn match_display_renders_leading_slash() {
        let m = Match {
            path: "foo".to_string(),
            uid: 1000,
            gids: vec![100, 200],
        };
        assert_eq!(m.to_string(), "path=\"/foo\" uid=1000 gids=100,200");
    }

    #[test]
    fn match_all_renders_empty() {
        let m = Match {
            path: String::new(),
            uid: UID_ANY,
            gids: vec![],
        };
        assert_eq!(m.to_string(), "");
    }

    #[test]
    fn round_trip_through_to_cap_string() {
        let text = "allow rw path=/foo uid=1000 gids=100,200; allow r uid=5";
        let p1 = Policy::parse(text).unwrap();
        let rendered = p1.to_cap_string();
        let p2 = Policy::parse(&rendered).unwrap();
        assert_eq!(p1.grants().len(), p2.grants().len());
        for (g1, g2) in p1.grants().iter().zip(p2.grants().iter()) {
            assert_eq!(g1, g2);
        }
    }

    #[test]
    fn round_trip_set_allow_all() {
        let mut p1 = Policy::parse("allow r path=/x").unwrap();
        p1.set_allow_all();
        let p2 = Policy::parse(&p1.to_cap_string()).unwrap();
        assert!(p2.allow_all());
    }
}
