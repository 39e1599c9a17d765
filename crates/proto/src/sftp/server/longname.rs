//! ls -l style presentation lines for NAME responses.

use chrono::{DateTime, Duration, Local, TimeZone, Utc};
use sealink_platform::fs::{FileStat, S_IFDIR, S_IFLNK, S_IFMT, S_IFREG};

const S_IFBLK: u32 = 0o060000;
const S_IFCHR: u32 = 0o020000;
const S_IFIFO: u32 = 0o010000;
const S_IFSOCK: u32 = 0o140000;

fn type_char(mode: u32) -> char {
    match mode & S_IFMT {
        S_IFDIR => 'd',
        S_IFLNK => 'l',
        S_IFBLK => 'b',
        S_IFCHR => 'c',
        S_IFIFO => 'p',
        S_IFSOCK => 's',
        S_IFREG => '-',
        _ => '-',
    }
}

fn rwx(bits: u32, out: &mut String) {
    out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
    out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
    out.push(if bits & 0o1 != 0 { 'x' } else { '-' });
}

/// Renders the mode column, e.g. `drwxr-xr-x`.
pub fn mode_string(mode: u32) -> String {
    let mut out = String::with_capacity(10);
    out.push(type_char(mode));
    rwx(mode >> 6, &mut out);
    rwx(mode >> 3, &mut out);
    rwx(mode, &mut out);
    out
}

/// Renders the timestamp column the way ls(1) does: hour and minute for
/// recent files, the year for anything older than about six months.
fn time_string(mtime: u32) -> String {
    let when: DateTime<Local> = match Utc.timestamp_opt(mtime as i64, 0) {
        chrono::LocalResult::Single(t) => t.with_timezone(&Local),
        _ => return "Jan  1  1970".to_string(),
    };
    let now = Local::now();
    let half_year = Duration::days(182);
    if when > now || now - when > half_year {
        when.format("%b %e  %Y").to_string()
    } else {
        when.format("%b %e %H:%M").to_string()
    }
}

/// Builds the full `ls -l` presentation line for one directory entry.
pub fn format_longname(name: &str, st: &FileStat) -> String {
    format!(
        "{} {:>4} {:<8} {:<8} {:>8} {} {}",
        mode_string(st.mode),
        st.nlink,
        st.uid,
        st.gid,
        st.size,
        time_string(st.mtime),
        name
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_string() {
        assert_eq!(mode_string(S_IFDIR | 0o755), "drwxr-xr-x");
        assert_eq!(mode_string(S_IFREG | 0o644), "-rw-r--r--");
        assert_eq!(mode_string(S_IFLNK | 0o777), "lrwxrwxrwx");
        assert_eq!(mode_string(S_IFREG | 0o000), "----------");
    }

    #[test]
    fn test_longname_shape() {
        let st = FileStat {
            size: 999,
            mode: S_IFREG | 0o644,
            uid: 1000,
            gid: 100,
            atime: 0,
            mtime: 0,
            nlink: 1,
        };
        let line = format_longname("file.txt", &st);
        assert!(line.starts_with("-rw-r--r--"));
        assert!(line.ends_with("file.txt"));
        assert!(line.contains("999"));
    }
}
