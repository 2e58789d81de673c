/// Residue reported when the read bases of a codon do not form whole codons.
pub const FRAMESHIFT: &str = ":";
/// Residue reported when every base of a codon was deleted.
pub const DELETED_RESIDUE: &str = "-";

pub fn complement(base: u8) -> u8 {
    match base.to_ascii_uppercase() {
        b'A' => b'T',
        b'T' => b'A',
        b'G' => b'C',
        b'C' => b'G',
        b'N' => b'N',
        other => other,
    }
}

/// Standard genetic code. Ambiguous or malformed codons translate to `X`, stops to `*`.
pub fn translate_codon(codon: &[u8]) -> char {
    let [a, b, c] = match codon {
        [a, b, c] => [a.to_ascii_uppercase(), b.to_ascii_uppercase(), c.to_ascii_uppercase()],
        _ => return 'X',
    };

    match (a, b, c) {
        (b'T', b'T', b'T' | b'C') => 'F',
        (b'T', b'T', b'A' | b'G') => 'L',
        (b'C', b'T', _) if is_base(c) => 'L',
        (b'A', b'T', b'T' | b'C' | b'A') => 'I',
        (b'A', b'T', b'G') => 'M',
        (b'G', b'T', _) if is_base(c) => 'V',
        (b'T', b'C', _) if is_base(c) => 'S',
        (b'C', b'C', _) if is_base(c) => 'P',
        (b'A', b'C', _) if is_base(c) => 'T',
        (b'G', b'C', _) if is_base(c) => 'A',
        (b'T', b'A', b'T' | b'C') => 'Y',
        (b'T', b'A', b'A' | b'G') => '*',
        (b'C', b'A', b'T' | b'C') => 'H',
        (b'C', b'A', b'A' | b'G') => 'Q',
        (b'A', b'A', b'T' | b'C') => 'N',
        (b'A', b'A', b'A' | b'G') => 'K',
        (b'G', b'A', b'T' | b'C') => 'D',
        (b'G', b'A', b'A' | b'G') => 'E',
        (b'T', b'G', b'T' | b'C') => 'C',
        (b'T', b'G', b'A') => '*',
        (b'T', b'G', b'G') => 'W',
        (b'C', b'G', _) if is_base(c) => 'R',
        (b'A', b'G', b'T' | b'C') => 'S',
        (b'A', b'G', b'A' | b'G') => 'R',
        (b'G', b'G', _) if is_base(c) => 'G',
        _ => 'X',
    }
}

fn is_base(b: u8) -> bool {
    matches!(b, b'A' | b'C' | b'G' | b'T')
}

/// Residue(s) encoded by the read bases of a codon, gaps removed.
pub fn translate_read_residue(codon: &str) -> String {
    let bases: Vec<u8> = codon.bytes().filter(|b| *b != b'-').collect();
    if bases.is_empty() {
        return DELETED_RESIDUE.to_string();
    }
    if bases.len() % 3 != 0 {
        return FRAMESHIFT.to_string();
    }
    bases.chunks(3).map(translate_codon).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translates_standard_code() {
        assert_eq!(translate_codon(b"ATG"), 'M');
        assert_eq!(translate_codon(b"tgg"), 'W');
        assert_eq!(translate_codon(b"TAA"), '*');
        assert_eq!(translate_codon(b"CTN"), 'X');
        assert_eq!(translate_codon(b"GGA"), 'G');
        assert_eq!(translate_codon(b"AT"), 'X');
    }

    #[test]
    fn read_residue_handles_indels() {
        assert_eq!(translate_read_residue("ATG"), "M");
        assert_eq!(translate_read_residue("A-G"), FRAMESHIFT);
        assert_eq!(translate_read_residue("---"), DELETED_RESIDUE);
        assert_eq!(translate_read_residue("ATGGCA"), "MA");
        assert_eq!(translate_read_residue("ATGG"), FRAMESHIFT);
    }

    #[test]
    fn complements_bases_and_keeps_gaps() {
        assert_eq!(complement(b'a'), b'T');
        assert_eq!(complement(b'C'), b'G');
        assert_eq!(complement(b'-'), b'-');
    }
}
