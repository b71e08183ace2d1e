use serde::{Deserialize, Serialize};

/// Token lists used by the keyword gate and the checklist validators.
///
/// Every list can be replaced from the `[vocabulary]` config section. Matching is a
/// case-folded substring test, so entries are stored lowercased.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Vocabulary {
    pub quote_request: Vec<String>,
    pub image_reference: Vec<String>,
    pub color: Vec<String>,
    pub fixture_type: Vec<String>,
    pub voltage: Vec<String>,
    pub production_ready: Vec<String>,
    pub delivery: Vec<String>,
    pub order_intent: Vec<String>,
    pub catalog_code: Vec<String>,
    pub client_confirmation: Vec<String>,
    pub lead_time: Vec<String>,
}

fn words(items: &[&str]) -> Vec<String> {
    items.iter().map(|item| item.to_string()).collect()
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self {
            quote_request: words(&[
                "orçamento",
                "orcamento",
                "cotação",
                "cotacao",
                "preço",
                "preco",
                "valor",
                "quanto custa",
                "quanto fica",
                "quanto sai",
                "me manda",
                "me envia",
                "aguardando",
                "quote",
                "price",
                "how much",
                "send me",
            ]),
            image_reference: words(&["imagem", "foto", "image", "anexo", "print"]),
            color: words(&[
                "branco",
                "branca",
                "preto",
                "preta",
                "dourado",
                "dourada",
                "prata",
                "cobre",
                "bronze",
                "cinza",
                "grafite",
                "champagne",
                "fendi",
                "rose",
            ]),
            fixture_type: words(&[
                "pendente",
                "plafon",
                "arandela",
                "luminária",
                "luminaria",
                "lustre",
                "spot",
                "trilho",
                "abajur",
                "coluna",
                "balizador",
                "embutido",
            ]),
            voltage: words(&["110", "127", "220", "bivolt"]),
            production_ready: words(&["pronto", "pronta", "produção", "producao", "estoque"]),
            delivery: words(&["entrega", "frete", "envio", "transportadora", "retirada"]),
            order_intent: words(&[
                "encomenda",
                "sob medida",
                "personalizado",
                "personalizada",
                "customizado",
                "fabricar",
                "quero fazer",
                "pedido especial",
            ]),
            catalog_code: words(&["código", "codigo", "cód", "ref.", "referência", "catálogo", "sku"]),
            client_confirmation: words(&[
                "confirmado",
                "confirmo",
                "pode fazer",
                "pode produzir",
                "fechado",
                "aprovado",
                "de acordo",
            ]),
            lead_time: words(&[
                "prazo",
                "dias úteis",
                "dias uteis",
                "disponibilidade",
                "previsão",
                "previsao",
                "semanas",
            ]),
        }
    }
}

impl Vocabulary {
    /// Lowercases and trims every entry and drops blanks.
    pub fn normalized(mut self) -> Self {
        for list in self.lists_mut() {
            *list = list
                .iter()
                .map(|token| token.trim().to_lowercase())
                .filter(|token| !token.is_empty())
                .collect();
        }
        self
    }

    pub fn empty_lists(&self) -> Vec<&'static str> {
        self.named_lists()
            .into_iter()
            .filter(|(_, list)| list.is_empty())
            .map(|(name, _)| name)
            .collect()
    }

    fn named_lists(&self) -> [(&'static str, &Vec<String>); 11] {
        [
            ("quote_request", &self.quote_request),
            ("image_reference", &self.image_reference),
            ("color", &self.color),
            ("fixture_type", &self.fixture_type),
            ("voltage", &self.voltage),
            ("production_ready", &self.production_ready),
            ("delivery", &self.delivery),
            ("order_intent", &self.order_intent),
            ("catalog_code", &self.catalog_code),
            ("client_confirmation", &self.client_confirmation),
            ("lead_time", &self.lead_time),
        ]
    }

    fn lists_mut(&mut self) -> [&mut Vec<String>; 11] {
        [
            &mut self.quote_request,
            &mut self.image_reference,
            &mut self.color,
            &mut self.fixture_type,
            &mut self.voltage,
            &mut self.production_ready,
            &mut self.delivery,
            &mut self.order_intent,
            &mut self.catalog_code,
            &mut self.client_confirmation,
            &mut self.lead_time,
        ]
    }
}

/// Case-folded substring match of any token in `tokens` against already-folded text.
pub fn matches_any(folded_text: &str, tokens: &[String]) -> bool {
    tokens.iter().any(|token| folded_text.contains(token.as_str()))
}

/// Tokens from `tokens` that occur in already-folded text, in list order.
pub fn matching_tokens(folded_text: &str, tokens: &[String]) -> Vec<String> {
    tokens.iter().filter(|token| folded_text.contains(token.as_str())).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::{matches_any, Vocabulary};

    #[test]
    fn normalization_folds_case_and_drops_blank_entries() {
        let vocabulary = Vocabulary {
            color: vec!["  Dourado ".to_string(), "".to_string(), "PRETO".to_string()],
            ..Vocabulary::default()
        }
        .normalized();

        assert_eq!(vocabulary.color, vec!["dourado".to_string(), "preto".to_string()]);
        assert!(matches_any("luminária dourado fosco", &vocabulary.color));
    }

    #[test]
    fn empty_lists_are_reported_by_name() {
        let vocabulary = Vocabulary { voltage: Vec::new(), ..Vocabulary::default() };
        assert_eq!(vocabulary.empty_lists(), vec!["voltage"]);
    }
}
