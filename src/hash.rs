// ==============================================================================
// Named Hash Functions for `hash` Attributes
// ==============================================================================
//
// A field declared as `id:uint (hash: "fnv1a_32")` accepts a string in literal
// data; the string is hashed and the hash is stored instead. Each function has
// a fixed output width, and a field may only name a function whose width
// matches its own integer width.
//
// Hashes are computed over the bytes before the first NUL, and MurmurHash3
// assembles its words from sign-extended bytes, so that values agree with
// the hashes `flatc` stores for the same strings.

/// A hash function selectable by name from a `hash` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashFunction {
    Fnv1_16,
    Fnv1a16,
    Fnv1_32,
    Fnv1a32,
    Murmur3,
    Fnv1_64,
    Fnv1a64,
}

const ALL: [HashFunction; 7] = [
    HashFunction::Fnv1_16,
    HashFunction::Fnv1a16,
    HashFunction::Fnv1_32,
    HashFunction::Fnv1a32,
    HashFunction::Murmur3,
    HashFunction::Fnv1_64,
    HashFunction::Fnv1a64,
];

const FNV32_PRIME: u32 = 0x0100_0193;
const FNV32_OFFSET_BASIS: u32 = 0x811C_9DC5;
const FNV64_PRIME: u64 = 0x0000_0100_0000_01b3;
const FNV64_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2645;

impl HashFunction {
    pub fn name(self) -> &'static str {
        match self {
            HashFunction::Fnv1_16 => "fnv1_16",
            HashFunction::Fnv1a16 => "fnv1a_16",
            HashFunction::Fnv1_32 => "fnv1_32",
            HashFunction::Fnv1a32 => "fnv1a_32",
            HashFunction::Murmur3 => "murmur3",
            HashFunction::Fnv1_64 => "fnv1_64",
            HashFunction::Fnv1a64 => "fnv1a_64",
        }
    }

    /// Output width in bits.
    pub fn bits(self) -> u32 {
        match self {
            HashFunction::Fnv1_16 | HashFunction::Fnv1a16 => 16,
            HashFunction::Fnv1_32 | HashFunction::Fnv1a32 | HashFunction::Murmur3 => 32,
            HashFunction::Fnv1_64 | HashFunction::Fnv1a64 => 64,
        }
    }

    /// Look up a function of the given width by name.
    pub fn find(name: &str, bits: u32) -> Option<HashFunction> {
        ALL.into_iter()
            .find(|f| f.bits() == bits && f.name() == name)
    }

    /// Names of all functions of the given width, for error messages.
    pub fn names_for(bits: u32) -> Vec<&'static str> {
        ALL.into_iter()
            .filter(|f| f.bits() == bits)
            .map(HashFunction::name)
            .collect()
    }

    /// Hash `input`, zero-extended to 64 bits.
    pub fn hash(self, input: &[u8]) -> u64 {
        let input = input
            .iter()
            .position(|&b| b == 0)
            .map_or(input, |nul| &input[..nul]);
        match self {
            HashFunction::Fnv1_16 => u64::from(fold16(fnv1_32(input))),
            HashFunction::Fnv1a16 => u64::from(fold16(fnv1a_32(input))),
            HashFunction::Fnv1_32 => u64::from(fnv1_32(input)),
            HashFunction::Fnv1a32 => u64::from(fnv1a_32(input)),
            HashFunction::Murmur3 => u64::from(murmur3_32(input)),
            HashFunction::Fnv1_64 => fnv1_64(input),
            HashFunction::Fnv1a64 => fnv1a_64(input),
        }
    }
}

fn fold16(hash: u32) -> u16 {
    ((hash >> 16) ^ (hash & 0xffff)) as u16
}

fn fnv1_32(input: &[u8]) -> u32 {
    input.iter().fold(FNV32_OFFSET_BASIS, |hash, &b| {
        hash.wrapping_mul(FNV32_PRIME) ^ u32::from(b)
    })
}

fn fnv1a_32(input: &[u8]) -> u32 {
    input.iter().fold(FNV32_OFFSET_BASIS, |hash, &b| {
        (hash ^ u32::from(b)).wrapping_mul(FNV32_PRIME)
    })
}

fn fnv1_64(input: &[u8]) -> u64 {
    input.iter().fold(FNV64_OFFSET_BASIS, |hash, &b| {
        hash.wrapping_mul(FNV64_PRIME) ^ u64::from(b)
    })
}

fn fnv1a_64(input: &[u8]) -> u64 {
    input.iter().fold(FNV64_OFFSET_BASIS, |hash, &b| {
        (hash ^ u64::from(b)).wrapping_mul(FNV64_PRIME)
    })
}

/// MurmurHash3 (x86, 32-bit) with a zero seed.
fn murmur3_32(input: &[u8]) -> u32 {
    const C1: u32 = 0xcc9e_2d51;
    const C2: u32 = 0x1b87_3593;

    fn mix(k: u32) -> u32 {
        k.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2)
    }

    // Bytes are signed, and a negative one spills into the higher lanes.
    fn word(bytes: &[u8]) -> u32 {
        bytes.iter().enumerate().fold(0u32, |word, (i, &b)| {
            word.wrapping_add((b as i8 as u32) << (8 * i))
        })
    }

    let mut h: u32 = 0;
    let mut chunks = input.chunks_exact(4);
    for chunk in &mut chunks {
        h ^= mix(word(chunk));
        h = h.rotate_left(13).wrapping_mul(5).wrapping_add(0xe654_6b64);
    }
    let tail = chunks.remainder();
    if !tail.is_empty() {
        h ^= mix(word(tail));
    }

    h ^= input.len() as u32;
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^ (h >> 16)
}
