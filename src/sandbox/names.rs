use std::collections::HashSet;

use once_cell::sync::Lazy;

/// Names reachable through `builtins` in CPython 3.11, plus `__builtins__` itself.
static BUILTINS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "ArithmeticError", "AssertionError", "AttributeError", "BaseException",
        "BaseExceptionGroup", "BlockingIOError", "BrokenPipeError", "BufferError", "BytesWarning",
        "ChildProcessError", "ConnectionAbortedError", "ConnectionError", "ConnectionRefusedError",
        "ConnectionResetError", "DeprecationWarning", "EOFError", "Ellipsis", "EncodingWarning",
        "EnvironmentError", "Exception", "ExceptionGroup", "False", "FileExistsError",
        "FileNotFoundError", "FloatingPointError", "FutureWarning", "GeneratorExit", "IOError",
        "ImportError", "ImportWarning", "IndentationError", "IndexError", "InterruptedError",
        "IsADirectoryError", "KeyError", "KeyboardInterrupt", "LookupError", "MemoryError",
        "ModuleNotFoundError", "NameError", "None", "NotADirectoryError", "NotImplemented",
        "NotImplementedError", "OSError", "OverflowError", "PendingDeprecationWarning",
        "PermissionError", "ProcessLookupError", "RecursionError", "ReferenceError",
        "ResourceWarning", "RuntimeError", "RuntimeWarning", "StopAsyncIteration", "StopIteration",
        "SyntaxError", "SyntaxWarning", "SystemError", "SystemExit", "TabError", "TimeoutError",
        "True", "TypeError", "UnboundLocalError", "UnicodeDecodeError", "UnicodeEncodeError",
        "UnicodeError", "UnicodeTranslateError", "UnicodeWarning", "UserWarning", "ValueError",
        "Warning", "ZeroDivisionError", "__build_class__", "__builtins__", "__debug__", "__doc__",
        "__import__", "__loader__", "__name__", "__package__", "__spec__", "abs", "aiter", "all",
        "anext", "any", "ascii", "bin", "bool", "breakpoint", "bytearray", "bytes", "callable",
        "chr", "classmethod", "compile", "complex", "copyright", "credits", "delattr", "dict",
        "dir", "divmod", "enumerate", "eval", "exec", "exit", "filter", "float", "format",
        "frozenset", "getattr", "globals", "hasattr", "hash", "help", "hex", "id", "input", "int",
        "isinstance", "issubclass", "iter", "len", "license", "list", "locals", "map", "max",
        "memoryview", "min", "next", "object", "oct", "open", "ord", "pow", "print", "property",
        "quit", "range", "repr", "reversed", "round", "set", "setattr", "slice", "sorted",
        "staticmethod", "str", "sum", "super", "tuple", "type", "vars", "zip",
    ]
    .into_iter()
    .collect()
});

/// Public top-level stdlib modules (`sys.stdlib_module_names`), plus `__future__` and `_thread`.
static STDLIB: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "__future__", "_thread", "abc", "aifc", "antigravity", "argparse", "array", "ast",
        "asynchat", "asyncio", "asyncore", "atexit", "audioop", "base64", "bdb", "binascii",
        "bisect", "builtins", "bz2", "cProfile", "calendar", "cgi", "cgitb", "chunk", "cmath",
        "cmd", "code", "codecs", "codeop", "collections", "colorsys", "compileall", "concurrent",
        "configparser", "contextlib", "contextvars", "copy", "copyreg", "crypt", "csv", "ctypes",
        "curses", "dataclasses", "datetime", "dbm", "decimal", "difflib", "dis", "distutils",
        "doctest", "email", "encodings", "ensurepip", "enum", "errno", "faulthandler", "fcntl",
        "filecmp", "fileinput", "fnmatch", "fractions", "ftplib", "functools", "gc", "genericpath",
        "getopt", "getpass", "gettext", "glob", "graphlib", "grp", "gzip", "hashlib", "heapq",
        "hmac", "html", "http", "idlelib", "imaplib", "imghdr", "imp", "importlib", "inspect", "io",
        "ipaddress", "itertools", "json", "keyword", "lib2to3", "linecache", "locale", "logging",
        "lzma", "mailbox", "mailcap", "marshal", "math", "mimetypes", "mmap", "modulefinder",
        "msilib", "msvcrt", "multiprocessing", "netrc", "nis", "nntplib", "nt", "ntpath",
        "nturl2path", "numbers", "opcode", "operator", "optparse", "os", "ossaudiodev", "pathlib",
        "pdb", "pickle", "pickletools", "pipes", "pkgutil", "platform", "plistlib", "poplib",
        "posix", "posixpath", "pprint", "profile", "pstats", "pty", "pwd", "py_compile", "pyclbr",
        "pydoc", "pydoc_data", "pyexpat", "queue", "quopri", "random", "re", "readline", "reprlib",
        "resource", "rlcompleter", "runpy", "sched", "secrets", "select", "selectors", "shelve",
        "shlex", "shutil", "signal", "site", "smtpd", "smtplib", "sndhdr", "socket", "socketserver",
        "spwd", "sqlite3", "sre_compile", "sre_constants", "sre_parse", "ssl", "stat", "statistics",
        "string", "stringprep", "struct", "subprocess", "sunau", "symtable", "sys", "sysconfig",
        "syslog", "tabnanny", "tarfile", "telnetlib", "tempfile", "termios", "textwrap", "this",
        "threading", "time", "timeit", "tkinter", "token", "tokenize", "tomllib", "trace",
        "traceback", "tracemalloc", "tty", "turtle", "turtledemo", "types", "typing", "unicodedata",
        "unittest", "urllib", "uu", "uuid", "venv", "warnings", "wave", "weakref", "webbrowser",
        "winreg", "winsound", "wsgiref", "xdrlib", "xml", "xmlrpc", "zipapp", "zipfile",
        "zipimport", "zlib", "zoneinfo",
    ]
    .into_iter()
    .collect()
});

/// Exception classes the executor can raise, with their bases (nearest first).
const EXCEPTION_BASES: &[(&str, &[&str])] = &[
    ("NameError", &["Exception", "BaseException"]),
    ("UnboundLocalError", &["NameError", "Exception", "BaseException"]),
    ("ImportError", &["Exception", "BaseException"]),
    ("ModuleNotFoundError", &["ImportError", "Exception", "BaseException"]),
    ("AttributeError", &["Exception", "BaseException"]),
    ("TypeError", &["Exception", "BaseException"]),
    ("SyntaxError", &["Exception", "BaseException"]),
    ("RuntimeError", &["Exception", "BaseException"]),
    ("Exception", &["BaseException"]),
];

pub(crate) fn is_builtin(name: &str) -> bool {
    BUILTINS.contains(name)
}

/// Whether the top-level package of `path` ships with the interpreter.
pub(crate) fn is_stdlib(path: &str) -> bool {
    let root = path.split('.').next().unwrap_or(path);
    STDLIB.contains(root)
}

/// `exception` itself followed by its known base classes.
pub(crate) fn exception_ancestry(exception: &str) -> Vec<&str> {
    let mut chain = vec![exception];
    if let Some((_, bases)) = EXCEPTION_BASES.iter().find(|(name, _)| *name == exception) {
        chain.extend(bases.iter().copied());
    } else if exception != "BaseException" {
        chain.extend(["Exception", "BaseException"]);
    }
    chain
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins() {
        assert!(is_builtin("len"));
        assert!(is_builtin("super"));
        assert!(is_builtin("__name__"));
        assert!(is_builtin("NotImplemented"));
        assert!(!is_builtin("helper_from_project"));
        assert!(!is_builtin("__file__"));
    }

    #[test]
    fn test_stdlib() {
        assert!(is_stdlib("os"));
        assert!(is_stdlib("os.path"));
        assert!(is_stdlib("collections.abc"));
        assert!(is_stdlib("__future__"));
        assert!(!is_stdlib("numpy"));
        assert!(!is_stdlib("nonexistent_pkg.sub"));
    }

    #[test]
    fn test_exception_ancestry() {
        assert_eq!(
            exception_ancestry("ModuleNotFoundError"),
            vec!["ModuleNotFoundError", "ImportError", "Exception", "BaseException"]
        );
        assert_eq!(
            exception_ancestry("ValueError"),
            vec!["ValueError", "Exception", "BaseException"]
        );
        assert_eq!(exception_ancestry("BaseException"), vec!["BaseException"]);
    }
}
